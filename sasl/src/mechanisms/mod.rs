pub mod plain;

#[cfg(feature = "scram")]
pub mod scram_sha1;

#[cfg(feature = "digest-md5")]
pub mod digest_md5;
