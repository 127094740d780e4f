use stress_test::{simulate, simulate_scaling};
use tracing_subscriber::EnvFilter;


#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("sardonyx=info".parse()?),
        )
        .init();

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            CONVERGENCE SIMULATION                          ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Few clients, shared documents
    let stats = simulate(4, 2, 100, 1).await?;
    stats.print();

    // More clients, more documents, bigger batches
    let stats = simulate(8, 5, 200, 2).await?;
    stats.print();

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS (clients)                        ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    simulate_scaling(12, 4).await?;

    println!("\n✓ All clients converged!");
    Ok(())
}
