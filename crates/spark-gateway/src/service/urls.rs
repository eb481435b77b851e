//! Rendering of the status URLs returned with every application record.
//!
//! The three URL templates are configured as textual templates over the
//! application payload. A template that fails to render produces an empty
//! URL and a log line, never a failed request; the URLs are a convenience,
//! not part of the submission contract.

use serde_json::json;
use snafu::{ResultExt, Snafu};
use tera::Tera;
use tracing::warn;

use crate::application::SparkApplication;

const SPARK_UI: &str = "sparkUI";
const SPARK_HISTORY_UI: &str = "sparkHistoryUI";
const LOGS_UI: &str = "logsUI";

pub type Result<T, E = UrlsError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum UrlsError {
    #[snafu(display("failed to parse status url template {name:?}"))]
    ParseTemplate { source: tera::Error, name: String },
}

/// The three status URLs attached to every application record.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatusUrls {
    #[serde(rename = "sparkUI")]
    pub spark_ui: String,

    #[serde(rename = "sparkHistoryUI")]
    pub spark_history_ui: String,

    #[serde(rename = "logsUI")]
    pub logs_ui: String,
}

/// Renders the configured status URL templates against application payloads.
#[derive(Debug)]
pub struct StatusUrlRenderer {
    tera: Tera,
}

impl StatusUrlRenderer {
    /// Parses all three templates. Parsing happens once at startup so broken
    /// templates are a config error, not a per-request surprise.
    pub fn new(templates: &crate::config::StatusUrlTemplates) -> Result<Self> {
        let mut tera = Tera::default();
        for (name, template) in [
            (SPARK_UI, &templates.spark_ui),
            (SPARK_HISTORY_UI, &templates.spark_history_ui),
            (LOGS_UI, &templates.logs_ui),
        ] {
            tera.add_raw_template(name, template)
                .context(ParseTemplateSnafu { name })?;
        }

        Ok(Self { tera })
    }

    /// Renders all three URLs. Individual render failures degrade to an
    /// empty string.
    pub fn render(&self, application: &SparkApplication) -> StatusUrls {
        let context = json!({
            "name": application.metadata.name,
            "namespace": application.metadata.namespace,
            "status": application.status,
        });
        let context = match tera::Context::from_value(context) {
            Ok(context) => context,
            Err(error) => {
                warn!(error = %error, "failed to build status url context");
                return StatusUrls::default();
            }
        };

        StatusUrls {
            spark_ui: self.render_one(SPARK_UI, &context),
            spark_history_ui: self.render_one(SPARK_HISTORY_UI, &context),
            logs_ui: self.render_one(LOGS_UI, &context),
        }
    }

    fn render_one(&self, name: &str, context: &tera::Context) -> String {
        match self.tera.render(name, context) {
            Ok(url) => url,
            Err(error) => {
                warn!(error = %error, template = name, "failed to render status url");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::config::StatusUrlTemplates;

    fn templates() -> StatusUrlTemplates {
        StatusUrlTemplates {
            spark_ui: "https://spark.example.com/{{ namespace }}/{{ name }}".to_owned(),
            spark_history_ui: "https://history.example.com/{{ status.sparkApplicationId }}"
                .to_owned(),
            logs_ui: "https://logs.example.com/{{ namespace }}/{{ name }}".to_owned(),
        }
    }

    #[test]
    fn renders_payload_fields() {
        let renderer = StatusUrlRenderer::new(&templates()).expect("templates parse");
        let application: SparkApplication = serde_json::from_value(json!({
            "metadata": {"name": "ca-ns1-app", "namespace": "spark"},
            "status": {"sparkApplicationId": "spark-123"}
        }))
        .expect("payload deserializes");

        let urls = renderer.render(&application);
        assert_eq!(urls.spark_ui, "https://spark.example.com/spark/ca-ns1-app");
        assert_eq!(urls.spark_history_ui, "https://history.example.com/spark-123");
        assert_eq!(urls.logs_ui, "https://logs.example.com/spark/ca-ns1-app");
    }

    #[test]
    fn render_failure_degrades_to_empty_url() {
        let renderer = StatusUrlRenderer::new(&templates()).expect("templates parse");

        // No status: the history template cannot resolve its variable.
        let application: SparkApplication = serde_json::from_value(json!({
            "metadata": {"name": "ca-ns1-app", "namespace": "spark"}
        }))
        .expect("payload deserializes");

        let urls = renderer.render(&application);
        assert_eq!(urls.spark_history_ui, "");
        assert_eq!(urls.spark_ui, "https://spark.example.com/spark/ca-ns1-app");
    }

    #[test]
    fn broken_template_is_a_startup_error() {
        let mut templates = templates();
        templates.logs_ui = "https://logs.example.com/{{ unclosed".to_owned();

        assert!(StatusUrlRenderer::new(&templates).is_err());
    }
}
