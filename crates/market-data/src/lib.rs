//! # Meridian Market Data
//!
//! The boundary between the simulation core and whatever produces historical
//! tables. The core never reads files or databases directly: it is handed a
//! `PriceFrame` and a `SignalFrame` by a `DataAccess` implementation and walks
//! them through a `MarketView`.
//!
//! ## Architectural Principles
//!
//! - **No lookahead by construction:** a `MarketView` is a cursor at day T and
//!   has no accessor that can reach a row after T.
//! - **Aligned calendar:** every symbol in a `PriceFrame` shares one date index;
//!   a missing bar is an explicit `None`, never a shifted row.

pub mod csv_source;
pub mod error;
pub mod frame;
pub mod source;
pub mod view;

pub use csv_source::CsvDataSource;
pub use error::DataError;
pub use frame::{PriceFrame, SignalFrame};
pub use source::{DataAccess, InMemoryDataSource};
pub use view::MarketView;
