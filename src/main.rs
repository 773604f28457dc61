use chalcedony::stress_test::{stress_test_all, stress_test_scaling};
use chalcedony::StressConfig;
use ocs_core::List;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => match StressConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                error!(path = %path, error = %e, "failed to load config");
                std::process::exit(2);
            }
        },
        None => StressConfig::default(),
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            std::process::exit(2);
        }
    };
    if !rt.block_on(async_main(config)) {
        std::process::exit(1);
    }
}

/// Returns whether every run converged.
async fn async_main(config: StressConfig) -> bool {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            CONVERGENCE STRESS TESTS                        ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    info!(?config, "running stress tests");

    let mut results = match stress_test_all(&config).await {
        Ok(results) => results,
        Err(e) => {
            error!(error = %e, "stress test failed");
            return false;
        }
    };
    for stats in &results {
        stats.print();
    }

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS (List)                           ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    match stress_test_scaling::<List<u64>>(&config, config.replicas * 2, 2).await {
        Ok(scaling) => {
            for stats in &scaling {
                stats.print();
            }
            results.extend(scaling);
        }
        Err(e) => {
            error!(error = %e, "scaling analysis failed");
            return false;
        }
    }

    let diverged: Vec<&str> = results.iter().filter(|s| !s.converged).map(|s| s.crdt).collect();
    if diverged.is_empty() {
        println!("\n✓ All stress tests completed successfully!");
        true
    } else {
        error!(?diverged, "replicas diverged");
        false
    }
}
