//! Weather passthrough to OpenWeatherMap

mod client;
pub mod routes;

pub use client::{WeatherClient, WeatherError, WeatherSource};
pub use routes::{WeatherAppState, weather_routes};
