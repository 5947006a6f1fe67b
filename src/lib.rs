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

//! Aggregates OpenShift pod usage records from partitioned columnar files
//! into daily cost-management summary rows (see `SPEC_FULL.md`).

pub mod capacity;
pub mod chunk;
pub mod coordinator;
pub mod cost_category;
pub mod driver;
pub mod error;
pub mod format;
pub mod labels;
pub mod loader;
pub mod model;
pub mod reader;
pub mod retry;
