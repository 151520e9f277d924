pub mod settings;

pub use settings::PhConfig;
