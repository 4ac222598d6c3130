//! Seed script for Interview Coach
//!
//! Creates two verified demo accounts in the configured data directory:
//! - free@example.com / password123 (free tier)
//! - premium@example.com / password123 (active subscription)
//! Existing accounts are left untouched, so the script can be re-run.
//! Run: cargo run --bin seed

use chrono::{Duration, Utc};
use clap::Parser;
use tracing::info;

use interview_coach::auth::hash_password;
use interview_coach::config::LogFormat;
use interview_coach::logging;
use interview_coach::models::User;
use interview_coach::storage::{Storage, StorageError, SubscriptionUpdate};

#[derive(Parser)]
#[command(name = "seed", about = "Create demo accounts")]
struct Args {
    #[arg(long, env = "DATA_DIR", default_value = "interview_data")]
    data_dir: std::path::PathBuf,

    #[arg(long, default_value = "password123")]
    password: String,

    #[arg(long, env = "BCRYPT_COST", default_value_t = bcrypt::DEFAULT_COST)]
    bcrypt_cost: u32,
}

fn ensure_user(storage: &Storage, email: &str, hash: &str) -> Result<User, StorageError> {
    if let Some(existing) = storage.find_user_by_email(email)? {
        info!(%email, "already present");
        return Ok(existing);
    }
    let mut user = User::new(email, hash);
    user.is_verified = true;
    user.verification_token = None;
    storage.create_user(&user)?;
    info!(%email, user_id = %user.id, "created");
    Ok(user)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let _guard = logging::init(LogFormat::Pretty, None);

    let storage = Storage::open(&args.data_dir)?;
    let hash = hash_password(&args.password, args.bcrypt_cost)?;

    ensure_user(&storage, "free@example.com", &hash)?;

    let premium = ensure_user(&storage, "premium@example.com", &hash)?;
    storage.apply_subscription(
        &premium.id,
        &SubscriptionUpdate {
            status: "active".to_string(),
            current_period_end: Some(Utc::now() + Duration::days(30)),
            cancel_at_period_end: false,
        },
    )?;

    storage.flush().await?;
    info!(data_dir = %args.data_dir.display(), "demo accounts ready");
    Ok(())
}
