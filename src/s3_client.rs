// src/s3_client.rs
//
//! Environment-driven S3 client construction.
//!
//! Builds one shared `aws_sdk_s3::Client` from the process environment:
//! credentials are required, the region falls back to `us-east-1`, and an
//! `AWS_ENDPOINT_URL` override (MinIO, Ceph, ...) switches the client to
//! path-style addressing.

use anyhow::{bail, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::{config::Region, Client};
use std::env;
use tokio::sync::OnceCell;
use tracing::debug;

pub const DEFAULT_REGION: &str = "us-east-1";

static CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Shared S3 client, initialized once per process.
pub async fn aws_s3_client() -> Result<Client> {
    let client = CLIENT
        .get_or_try_init(|| async {
            dotenvy::dotenv().ok();

            if env::var("AWS_ACCESS_KEY_ID").is_err() || env::var("AWS_SECRET_ACCESS_KEY").is_err()
            {
                bail!("Missing AWS_ACCESS_KEY_ID or AWS_SECRET_ACCESS_KEY");
            }

            let region =
                RegionProviderChain::first_try(env::var("AWS_REGION").ok().map(Region::new))
                    .or_default_provider()
                    .or_else(Region::new(DEFAULT_REGION));

            let mut loader =
                aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);
            if let Ok(endpoint) = env::var("AWS_ENDPOINT_URL") {
                if !endpoint.is_empty() {
                    debug!(endpoint, "Using custom S3 endpoint");
                    loader = loader.endpoint_url(endpoint);
                }
            }
            let cfg = loader.load().await;

            // Path-style addressing for S3-compatible services behind
            // custom endpoints; harmless against AWS proper.
            let s3_config = aws_sdk_s3::config::Builder::from(&cfg)
                .force_path_style(true)
                .build();
            Ok(Client::from_conf(s3_config))
        })
        .await?;
    Ok(client.clone())
}
