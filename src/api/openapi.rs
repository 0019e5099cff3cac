//! OpenAPI document for the REST API, generated at compile time by utoipa.

use utoipa::OpenApi;

/// OpenAPI documentation for the channel-ingest REST API
///
/// Served as JSON at `/api/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "channel-ingest REST API",
        version = "0.1.0",
        description = "Start, pause and monitor resumable channel ingestion jobs",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development server")
    ),
    paths(
        // Jobs
        crate::api::routes::start_job,
        crate::api::routes::pause_job,
        crate::api::routes::job_status,
        crate::api::routes::list_channel_jobs,

        // Counters
        crate::api::routes::channel_stats,
        crate::api::routes::proxy_stats,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(schemas(
        crate::types::JobId,
        crate::types::JobStatus,
        crate::types::JobConfig,
        crate::types::Job,
        crate::types::JobStats,
        crate::types::JobResult,
        crate::types::ChannelStats,
        crate::types::Event,
        crate::proxy::ProxyStats,

        crate::api::routes::StartJobRequest,
        crate::api::routes::PauseJobRequest,
        crate::api::routes::JobStatusResponse,
        crate::api::routes::JobListResponse,

        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "parse", description = "Ingestion jobs - start, pause, inspect"),
        (name = "stats", description = "Stored channel counters and proxy pool health"),
        (name = "system", description = "Health check, OpenAPI document, event stream"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Declares the `X-Api-Key` header scheme
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = &mut openapi.components {
            components.add_security_scheme(
                "api_key",
                utoipa::openapi::security::SecurityScheme::ApiKey(
                    utoipa::openapi::security::ApiKey::Header(
                        utoipa::openapi::security::ApiKeyValue::new("X-Api-Key"),
                    ),
                ),
            );
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_job_routes() {
        let spec = ApiDoc::openapi();
        for path in [
            "/api/parse/start",
            "/api/parse/pause",
            "/api/parse/status/{job_id}",
            "/api/parse/jobs/{channel}",
            "/api/stats/channel/{channel}",
            "/api/health",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing path {}", path);
        }
    }

    #[test]
    fn test_openapi_components_and_security() {
        let spec = ApiDoc::openapi();
        let components = spec.components.unwrap();
        assert!(components.schemas.contains_key("JobStats"));
        assert!(components.schemas.contains_key("ApiError"));
        assert!(components.security_schemes.contains_key("api_key"));
    }

    #[test]
    fn test_openapi_info_and_tags() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "channel-ingest REST API");

        let tags = spec.tags.unwrap();
        let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["parse", "stats", "system"]);
    }
}
