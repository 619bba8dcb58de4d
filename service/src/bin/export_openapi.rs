//! Print the `OpenAPI` spec for the REST surface as JSON.
//!
//! Used by CI to publish the spec artifact.

#![allow(clippy::print_stdout)]

use isohub_api::rest::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<(), serde_json::Error> {
    println!("{}", ApiDoc::openapi().to_pretty_json()?);
    Ok(())
}
