use std::process::ExitCode;

use tandem_grid::services::documentation::ApiDoc;
use utoipa::OpenApi;

fn main() -> ExitCode {
    match ApiDoc::openapi().to_pretty_json() {
        Ok(doc) => {
            println!("{doc}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("failed to render the OpenAPI document: {err}");
            ExitCode::FAILURE
        }
    }
}
