pub mod coordinates;
pub mod metadata;
pub mod paths;
pub mod pom;
