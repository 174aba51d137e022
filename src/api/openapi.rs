use super::handlers::health;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(health::health),
    components(schemas(health::Health)),
    tags((name = "health", description = "Service and key-value store status"))
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_health() {
        let doc = openapi();
        assert!(doc.paths.paths.contains_key("/health"));
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
    }
}
