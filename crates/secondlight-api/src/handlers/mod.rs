//! HTTP handlers for secondlight-api.

pub mod analysis;
pub mod documents;
pub mod subscription;
