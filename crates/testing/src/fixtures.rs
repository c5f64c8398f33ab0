//! Migration fixtures

use stepwise_core::{BackendError, Migration, Source};

/// Default apply template, a harmless query echoing the migration number
pub const DEFAULT_APPLY_TEMPLATE: &str = "SELECT {n};";
/// Default revert template, echoing the migration number times ten
pub const DEFAULT_REVERT_TEMPLATE: &str = "SELECT {n}0;";

/// Fill `{test}` and `{n}` placeholders in a query template
pub fn render_template(template: &str, test_name: &str, n: u32) -> String {
    template
        .replace("{test}", test_name)
        .replace("{n}", &n.to_string())
}

/// Generate migrations `1..=count` from apply/revert templates
pub fn gen_migrations_with(
    count: u32,
    test_name: &str,
    apply_template: &str,
    revert_template: &str,
) -> Vec<Migration> {
    (1..=count)
        .map(|n| {
            Migration::new(
                n,
                format!("test-mig-{}", n),
                render_template(apply_template, test_name, n),
                render_template(revert_template, test_name, n),
            )
        })
        .collect()
}

/// Generate migrations `1..=count` with `SELECT n;` / `SELECT n0;` bodies
pub fn gen_migrations(count: u32, test_name: &str) -> Vec<Migration> {
    gen_migrations_with(count, test_name, DEFAULT_APPLY_TEMPLATE, DEFAULT_REVERT_TEMPLATE)
}

/// Source whose `load` always fails
#[derive(Debug, Clone)]
pub struct FailingSource {
    message: String,
}

impl FailingSource {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for FailingSource {
    fn default() -> Self {
        Self::new("source unavailable")
    }
}

impl Source for FailingSource {
    fn load(&self) -> Result<Vec<Migration>, BackendError> {
        Err(self.message.clone().into())
    }
}
