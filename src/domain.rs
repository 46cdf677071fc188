//! Domain module - identifiers, entities and the event vocabulary
//!
//! Nothing in here performs I/O; the crawling and control layers build on these types.

pub mod entities;
pub mod events;
pub mod ids;

pub use entities::{City, Component, Country, DateDim, FetchStatus, HourDim, PostalArea, PriceValue, Province};
pub use events::{BotEvent, Dispatch, EventBus, EventSink, EventTarget, TracingSink};
