//! Heartbeat transport over link-local IPv6 multicast.
//!
//! `broadcast` owns the send side and implements the detector's
//! `Transport`. `listener` joins the group and feeds every decoded
//! heartbeat into `Detector::detect`.

pub mod broadcast;
pub mod listener;
