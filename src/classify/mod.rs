//! Classification: defect taxonomy and subject extraction.

pub mod subject;
pub mod taxonomy;
