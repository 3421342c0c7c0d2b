pub mod extract;
pub mod filters;
pub mod robots;
pub mod sitemap;

pub use extract::LinkExtractor;
pub use filters::FilterPolicy;
pub use robots::Robots;
