use crate::routes::{convert, health};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(info(
    title = "vidgate-server",
    description = "Upload a video, receive an MP4 that plays back on messaging apps",
    version = "0.1.0"
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(convert::ConvertApi::openapi());
    root
}
