pub mod compression;
pub mod glob;

#[cfg_attr(docsrs, doc(cfg(feature = "source-csv")))]
#[cfg(feature = "source-csv")]
pub mod csv;
