//! Integration tests for the playback core
//!
//! Drive the full path (negotiation → engine → simulated driver) the way an
//! application would.

#[cfg(test)]
mod music_box_tests;
#[cfg(test)]
mod playback_tests;
