pub mod assembly;
pub mod checksum;
pub mod maven;
pub mod repository;
pub mod resolver;
pub mod util;
