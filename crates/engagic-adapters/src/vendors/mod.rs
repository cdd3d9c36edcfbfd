// SPDX-License-Identifier: MIT OR Apache-2.0
//! One fetcher module per civic publishing platform (§4.1).

pub mod civicclerk;
pub mod civicplus;
pub mod generic;
pub mod granicus;
pub mod legistar;
pub mod novusagenda;
pub mod primegov;
