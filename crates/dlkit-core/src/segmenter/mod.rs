//! Range math and segment planning (C6 SegmentPlanner).
//!
//! Splits a download into N segments and computes HTTP Range header
//! bounds. Resume state needs no separate completion bitmap: each
//! `Segment` already carries its own `downloaded_bytes`, and the whole
//! `Vec<Segment>` round-trips through `TaskStore` as one JSON column.

mod range;

pub use range::{plan, plan_segments, resegment, Segment};
