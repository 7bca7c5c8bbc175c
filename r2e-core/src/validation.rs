use axum::extract::FromRequest;
use crate::http::response::{IntoResponse, Response};
use crate::http::{Json, StatusCode};
use serde::Serialize;

// ── Error types ────────────────────────────────────────────

/// A field-level validation error.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub code: String,
}

/// Container for validation errors, used as the payload of `AppError::Validation`.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationErrorResponse {
    pub errors: Vec<FieldError>,
}

// ── Autoref specialization for automatic validation ────────

/// Wrapper used by the autoref specialization trick in generated code.
///
/// The generated handler code calls:
/// ```ignore
/// (&__AutoValidator(&value)).__maybe_validate()
/// ```
///
/// Method resolution picks:
/// - `__DoValidate` (direct match) when `T: garde::Validate<Context = ()>` → runs validation
/// - `__SkipValidate` (autoref fallback) when `T` doesn't impl Validate → no-op
pub struct __AutoValidator<'a, T>(pub &'a T);

/// Matched when `T: garde::Validate<Context = ()>` (direct, higher priority).
pub trait __DoValidate {
    fn __maybe_validate(&self) -> Result<(), Response>;
}

impl<T: garde::Validate> __DoValidate for __AutoValidator<'_, T>
where
    T::Context: Default,
{
    fn __maybe_validate(&self) -> Result<(), Response> {
        self.0
            .validate()
            .map_err(|report| convert_garde_report(&report))
    }
}

/// Fallback via autoref (lower priority) — no-op for types without Validate.
pub trait __SkipValidate {
    fn __maybe_validate(&self) -> Result<(), Response>;
}

impl<T> __SkipValidate for &__AutoValidator<'_, T> {
    fn __maybe_validate(&self) -> Result<(), Response> {
        Ok(())
    }
}

fn convert_garde_report(report: &garde::Report) -> Response {
    let mut field_errors = Vec::new();

    for (path, error) in report.iter() {
        let field = {
            let s = path.to_string();
            if s.is_empty() { "value".to_string() } else { s }
        };
        field_errors.push(FieldError {
            field,
            message: error.message().to_string(),
            code: "validation".to_string(),
        });
    }

    let resp = ValidationErrorResponse {
        errors: field_errors,
    };

    let body = serde_json::json!({
        "error": "Validation failed",
        "details": resp.errors,
    });
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

// Re-export garde::Validate for convenience.
pub use garde::Validate;

// ── Validated<T> extractor ──────────────────────────────────

/// JSON body extractor that runs `garde` validation before handing the
/// value to the handler, returning `400` with field-level details on
/// failure instead of the handler ever seeing an invalid value.
///
/// ```ignore
/// async fn create(&self, body: Validated<CreateUser>) -> JsonResult<User> { ... }
/// ```
pub struct Validated<T>(pub T);

impl<T> std::ops::Deref for Validated<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> Validated<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<S, T> axum::extract::FromRequest<S> for Validated<T>
where
    S: Send + Sync,
    T: serde::de::DeserializeOwned + garde::Validate,
    T::Context: Default,
{
    type Rejection = Response;

    async fn from_request(
        req: axum::extract::Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| e.into_response())?;
        value
            .validate()
            .map_err(|report| convert_garde_report(&report))?;
        Ok(Validated(value))
    }
}
