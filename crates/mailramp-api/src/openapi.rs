//! OpenAPI documentation
//!
//! Provides an OpenAPI 3.0 document and Swagger UI for the MailRamp API.

use axum::{
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde_json::json;

/// Create OpenAPI routes
pub fn create_openapi_routes() -> Router {
    Router::new()
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
}

async fn openapi_json() -> impl IntoResponse {
    Json(get_openapi_spec())
}

async fn swagger_ui() -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}

fn dispatch_operation(operation_id: &str) -> serde_json::Value {
    json!({
        "tags": ["dispatch"],
        "summary": "Run one dispatch cycle",
        "description": "Starts due scheduled campaigns, resets daily sender counters, sends every eligible queued email up to the per-cycle ceiling and completes finished campaigns.",
        "operationId": operation_id,
        "security": [{"bearerAuth": []}, {"apiKey": []}],
        "responses": {
            "200": {
                "description": "Cycle ran to the end; per-message failures are counted in the summary",
                "content": {
                    "application/json": {
                        "schema": {"$ref": "#/components/schemas/CycleSummary"}
                    }
                }
            },
            "401": {
                "description": "Missing or invalid trigger token",
                "content": {
                    "application/json": {
                        "schema": {"$ref": "#/components/schemas/DispatchFailure"}
                    }
                }
            },
            "500": {
                "description": "Cycle aborted",
                "content": {
                    "application/json": {
                        "schema": {"$ref": "#/components/schemas/DispatchFailure"}
                    }
                }
            }
        }
    })
}

/// Get the OpenAPI specification as JSON
fn get_openapi_spec() -> serde_json::Value {
    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "MailRamp API",
            "description": "Dispatch trigger for the MailRamp campaign engine\n\n## Authentication\n\nWhen `api.trigger_token` is configured the dispatch endpoint requires it.\n\n- **Header**: `X-API-Key: <token>`\n- **Bearer**: `Authorization: Bearer <token>`",
            "version": env!("CARGO_PKG_VERSION"),
            "license": {
                "name": "Apache-2.0",
                "url": "https://www.apache.org/licenses/LICENSE-2.0"
            }
        },
        "tags": [
            {"name": "health", "description": "Health check endpoints"},
            {"name": "dispatch", "description": "Campaign dispatch"}
        ],
        "paths": {
            "/health": {
                "get": {
                    "tags": ["health"],
                    "summary": "Basic health check",
                    "operationId": "health",
                    "responses": {
                        "200": {
                            "description": "Service is healthy",
                            "content": {
                                "application/json": {
                                    "schema": {"$ref": "#/components/schemas/HealthResponse"}
                                }
                            }
                        }
                    }
                }
            },
            "/health/live": {
                "get": {
                    "tags": ["health"],
                    "summary": "Liveness check",
                    "operationId": "liveness",
                    "responses": {
                        "200": {"description": "Service is alive"}
                    }
                }
            },
            "/health/ready": {
                "get": {
                    "tags": ["health"],
                    "summary": "Readiness check",
                    "operationId": "readiness",
                    "responses": {
                        "200": {"description": "Database reachable"},
                        "503": {"description": "Database unreachable"}
                    }
                }
            },
            "/health/detailed": {
                "get": {
                    "tags": ["health"],
                    "summary": "Detailed health check",
                    "operationId": "healthDetailed",
                    "responses": {
                        "200": {
                            "description": "Detailed health status",
                            "content": {
                                "application/json": {
                                    "schema": {"$ref": "#/components/schemas/DetailedHealthResponse"}
                                }
                            }
                        }
                    }
                }
            },
            "/api/v1/dispatch": {
                "get": dispatch_operation("dispatchGet"),
                "post": dispatch_operation("dispatch")
            }
        },
        "components": {
            "securitySchemes": {
                "bearerAuth": {"type": "http", "scheme": "bearer"},
                "apiKey": {"type": "apiKey", "in": "header", "name": "X-API-Key"}
            },
            "schemas": {
                "HealthResponse": {
                    "type": "object",
                    "properties": {
                        "status": {"type": "string", "example": "healthy"}
                    }
                },
                "DetailedHealthResponse": {
                    "type": "object",
                    "properties": {
                        "status": {"type": "string"},
                        "checks": {
                            "type": "object",
                            "properties": {
                                "database": {"$ref": "#/components/schemas/ComponentHealth"}
                            }
                        }
                    }
                },
                "ComponentHealth": {
                    "type": "object",
                    "properties": {
                        "status": {"type": "string", "enum": ["healthy", "unhealthy"]},
                        "latency_ms": {"type": "integer"},
                        "error": {"type": "string"}
                    }
                },
                "SenderSummary": {
                    "type": "object",
                    "properties": {
                        "sender_id": {"type": "string", "format": "uuid"},
                        "sent": {"type": "integer"},
                        "failed": {"type": "integer"}
                    }
                },
                "CycleSummary": {
                    "type": "object",
                    "properties": {
                        "success": {"type": "boolean"},
                        "processed": {"type": "integer", "description": "Entries that reached sent or failed"},
                        "sent": {"type": "integer"},
                        "failed": {"type": "integer"},
                        "skipped": {"type": "integer", "description": "Candidates left pending this cycle"},
                        "campaigns_started": {"type": "integer"},
                        "campaigns_completed": {"type": "integer"},
                        "retried": {"type": "integer"},
                        "senders": {
                            "type": "array",
                            "items": {"$ref": "#/components/schemas/SenderSummary"}
                        }
                    }
                },
                "DispatchFailure": {
                    "type": "object",
                    "properties": {
                        "success": {"type": "boolean", "example": false},
                        "error": {"type": "string"}
                    }
                }
            }
        }
    })
}

const SWAGGER_UI_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>MailRamp API Documentation</title>
    <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5.9.0/swagger-ui.css" />
    <style>
        body { margin: 0; padding: 0; }
        .swagger-ui .topbar { display: none; }
    </style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5.9.0/swagger-ui-bundle.js"></script>
    <script>
        window.onload = function() {
            SwaggerUIBundle({
                url: "/openapi.json",
                dom_id: '#swagger-ui',
                deepLinking: true,
                presets: [
                    SwaggerUIBundle.presets.apis,
                    SwaggerUIBundle.SwaggerUIStandalonePreset
                ],
                layout: "StandaloneLayout"
            });
        };
    </script>
</body>
</html>"#;
