pub mod average_price;
pub mod candle;
pub mod context;
pub mod errors;
pub mod risk;
pub mod signal;
