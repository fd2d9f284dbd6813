// Stract is an open source web search engine.
// Copyright (C) 2023 Stract ApS
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Core library for the crawler: frontier, politeness, coordination store
//! and the fetcher/parser/supervisor pipeline.

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod coordination;
pub mod crawler;
pub mod distributed;
pub mod entrypoint;

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
