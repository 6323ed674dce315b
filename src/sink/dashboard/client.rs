use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::FrameContent;

/// Thin HTTP client for the dashboard server.
#[derive(Clone)]
pub struct DashboardClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct NotebookRequest<'a> {
    title: &'a str,
    tags: &'a [String],
}

#[derive(Serialize)]
struct FrameRequest<'a> {
    title: &'a str,
}

#[derive(Deserialize)]
struct Created {
    id: String,
}

impl DashboardClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn create_notebook(&self, title: &str, tags: &[String]) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/notebooks", self.base_url))
            .json(&NotebookRequest { title, tags })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Dashboard error creating notebook: {}", response.status()));
        }
        let created: Created = response.json().await?;
        Ok(created.id)
    }

    pub async fn create_frame(&self, notebook: &str, title: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/notebooks/{}/frames", self.base_url, notebook))
            .json(&FrameRequest { title })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Dashboard error creating frame '{}': {}", title, response.status()));
        }
        let created: Created = response.json().await?;
        Ok(created.id)
    }

    pub async fn put_content(&self, frame: &str, content: &FrameContent) -> Result<()> {
        let response = self
            .client
            .put(format!("{}/api/frames/{}", self.base_url, frame))
            .json(content)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Dashboard error updating frame {}: {}", frame, response.status()));
        }

        if let FrameContent::Images { png, .. } = content {
            for (i, bytes) in png.iter().enumerate() {
                self.upload_image(frame, i, bytes.clone()).await?;
            }
        }
        Ok(())
    }

    async fn upload_image(&self, frame: &str, index: usize, png: Vec<u8>) -> Result<()> {
        let response = self
            .client
            .put(format!("{}/api/frames/{}/images/{}", self.base_url, frame, index))
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(png)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Dashboard error uploading image {}: {}", index, response.status()));
        }
        Ok(())
    }
}
