// Copyright (C) 2026 Ryan Daum <ryan.daum@gmail.com>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! `/metrics` introspection route (spec §6 "Introspection"): a JSON dump of
//! `MudMetrics::snapshot()`, the narrow read side the Performance/Metrics
//! component (C17) exposes outside the process.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use mudcore_metrics::{MetricsReader, MetricsSnapshot};

use crate::supervisor::Supervisor;

pub async fn metrics_handler(State(supervisor): State<Arc<Supervisor>>) -> Json<MetricsSnapshot> {
    Json(supervisor.metrics.snapshot())
}
