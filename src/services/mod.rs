//! Service layer: storage gateway, version grouping, job admission and
//! lifecycle, delta ingestion, content hashing.

pub mod delta_service;
pub mod digest;
pub mod job_service;
pub mod project_service;
pub mod storage_service;
pub mod versions;

#[cfg(test)]
pub mod test_support;
