// Copyright 2024 Zinc Labs Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! CLI entry point. Builder-style `clap::Command` (no `derive` feature, same
//! as the teacher's `cli/basic/cli.rs`): one `--truncate` flag, everything
//! else comes from the environment (§6 "CLI surface").

use ocp_cost_aggregator::{driver, error::Error};

fn cli() -> clap::Command {
    clap::Command::new("ocp-cost-aggregator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Aggregates OpenShift pod usage records into daily cost-management summaries")
        .arg(
            clap::Arg::new("truncate")
                .long("truncate")
                .action(clap::ArgAction::SetTrue)
                .help("truncate the destination table before loading, overriding $TRUNCATE"),
        )
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let matches = cli().get_matches();
    let force_truncate = matches.get_flag("truncate");

    let exit_code = match run(force_truncate).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(taxonomy = e.taxonomy(), error = %e, "run failed");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(force_truncate: bool) -> Result<(), Error> {
    let cfg = config::RunConfig::from_env(force_truncate)?;
    driver::run(&cfg).await?;
    Ok(())
}
