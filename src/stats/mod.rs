//! Statistics and report rendering
//!
//! Computes summary statistics over latency result sets and renders the
//! diagnostic report shown to the user ([`report`]).

pub mod report;
