//! Data models for the image metadata service.
//!
//! `image` is the durable record, `object` the local object store's view of
//! a payload. `requests`/`responses` are the HTTP bodies; requests carry
//! their own validation.

pub mod image;
pub mod object;
pub mod requests;
pub mod responses;
