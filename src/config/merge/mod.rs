//! Config composition: default policy plus the merge service.

pub mod policy;
pub mod service;
