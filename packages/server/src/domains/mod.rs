// Business domains
pub mod creators;
pub mod credentials;
pub mod discovery;
pub mod scraping;
pub mod sync;
