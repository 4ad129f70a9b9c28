use crate::config::Environment;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset. sqlx statement logging stays off.
fn default_directives(env: &Environment) -> &'static str {
    match env {
        Environment::Dev => {
            "hexabid_agents=debug,tower_http=debug,sqlx=warn,hyper=info,reqwest=info,redis=info,info"
        }
        Environment::Staging => {
            "hexabid_agents=debug,hexabid_agents::agents=info,tower_http=info,sqlx=warn,hyper=warn,info"
        }
        Environment::Prod => {
            "hexabid_agents=info,tower_http=warn,sqlx=error,hyper=warn,reqwest=warn,warn"
        }
    }
}

pub fn init_logging(env: &Environment) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(env)));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(env.is_dev())
        .with_line_number(env.is_dev());

    // JSON lines carry the current span, which holds execution_id
    match env {
        Environment::Prod => tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json().with_current_span(true).with_span_list(false))
            .init(),
        Environment::Dev | Environment::Staging => tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.pretty())
            .init(),
    }

    tracing::info!(environment = ?env, "Logging initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_parse_for_every_environment() {
        for env in [Environment::Dev, Environment::Staging, Environment::Prod] {
            let directives = default_directives(&env);
            assert!(EnvFilter::try_new(directives).is_ok(), "{directives}");
            assert!(directives.contains("sqlx="));
        }
    }
}
