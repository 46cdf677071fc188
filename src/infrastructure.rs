//! Infrastructure layer: configuration, logging, storage, HTTP and file I/O

pub mod config;
pub mod database_connection;
pub mod geo_import;
pub mod http_client;
pub mod logging;
pub mod payload_archive;
pub mod price_repository;

pub use config::{AppConfig, ConfigError, CountryConfig, LoggingConfig};
pub use database_connection::DatabaseConnection;
pub use geo_import::{CsvGeoImporter, GeoImportError, GeoImporter, ImportSummary};
pub use http_client::{FetchError, FetchResponse, HttpClient, PageFetcher};
pub use logging::{init_logging, init_logging_with_config, log_system_info};
pub use payload_archive::PayloadArchive;
pub use price_repository::{PriceRepository, Table};
