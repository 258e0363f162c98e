mod readings;

pub use readings::MAX_RECENT_LIMIT;
