//! earlink acquires streaming packets from an ear-EEG recording chip
//! over a serial link, decodes them into per-channel samples, and fans
//! the samples out to concurrent post-processing pipelines (raw EEG, I/Q
//! magnitude, I/Q phase) whose sliding windows feed visualization, while
//! every decoded packet is queued for CSV persistence.
//!
//! The link multiplexes two sub-protocols: fixed-length binary frames
//! while streaming, and a newline-terminated text command/response
//! protocol otherwise. The [`link_driver`] owns the connection and the
//! switching between the two; [`frame_codec`] does the byte-exact
//! decoding; [`pipeline`] workers poll the [`channel_store`] and maintain
//! their [`sliding_window`] buffers; [`save_writer`] drains the save
//! queue to disk.

#![warn(missing_docs)]
pub mod args;
pub mod channel_store;
pub mod command;
pub mod dummy_link;
pub mod frame_codec;
pub mod layout_config;
pub mod link_driver;
pub mod pipeline;
pub mod reg_dump;
pub mod save_writer;
pub mod sliding_window;
