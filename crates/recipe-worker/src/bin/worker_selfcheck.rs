use anyhow::Context;
use recipe_db::Database;
use recipe_queue::QueueConfig;
use recipe_storage::MediaStorage;
use recipe_worker::WorkerConfig;

const PROBE_KEY: &str = ".selfcheck";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    let storage = MediaStorage::from_env().await?;
    println!(
        "worker-selfcheck: starting with media_root={}",
        storage.root().display()
    );
    ensure_media_writable(&storage).await?;

    Database::from_env()
        .await
        .context("database unavailable")?
        .ping()
        .await
        .context("database ping failed")?;

    recipe_queue::connect(QueueConfig::from_env())
        .await
        .context("queue unavailable")?
        .ping()
        .await
        .context("queue ping failed")?;

    if let Some(url) = &config.mail_relay_url {
        println!("worker-selfcheck: mail relay {url}");
    } else {
        println!("worker-selfcheck: no MAIL_RELAY_URL, mail will only be logged");
    }

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_media_writable(storage: &MediaStorage) -> anyhow::Result<()> {
    storage
        .upload_bytes(b"ok", PROBE_KEY)
        .await
        .context("media root is not writable")?;
    storage.delete_object(PROBE_KEY).await?;
    Ok(())
}
