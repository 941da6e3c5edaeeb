// Market data module entrypoint
pub mod adapters; // venue adapters behind one trait
pub mod cache; // TTL market cache with single-flight refill
pub mod fees; // platform fee table
pub mod normaliser; // venue wire values -> decimals and base units
pub mod order_book; // aggregated price ladders
pub mod types; // shared value types
