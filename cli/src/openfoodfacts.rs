use anyhow::{Context, Result};

use glyco_core::models::NewFood;
use glyco_core::openfoodfacts::{ProductResponse, SearchResponse, product_to_food};
use glyco_core::service::FoodLookupProvider;

const SEARCH_URL: &str = "https://world.openfoodfacts.org/cgi/search.pl";
const PRODUCT_URL: &str = "https://world.openfoodfacts.org/api/v0/product";
const PAGE_SIZE: &str = "10";

pub struct OpenFoodFactsClient {
    client: reqwest::Client,
}

impl OpenFoodFactsClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "glyco-cli/{} (diabetes tracker)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(std::time::Duration::from_secs(10))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    pub async fn search_async(&self, query: &str) -> Result<Vec<NewFood>> {
        let resp = self
            .client
            .get(SEARCH_URL)
            .query(&[
                ("search_terms", query),
                ("search_simple", "1"),
                ("action", "process"),
                ("json", "1"),
                ("page_size", PAGE_SIZE),
            ])
            .send()
            .await
            .context("Failed to reach OpenFoodFacts API")?
            .error_for_status()
            .context("OpenFoodFacts search failed")?;

        let data: SearchResponse = resp
            .json()
            .await
            .context("Failed to parse OpenFoodFacts search response")?;

        let foods: Vec<NewFood> = data
            .products
            .into_iter()
            .filter_map(product_to_food)
            .collect();
        tracing::debug!(query, results = foods.len(), "OpenFoodFacts search");

        Ok(foods)
    }

    pub async fn lookup_barcode_async(&self, barcode: &str) -> Result<Option<NewFood>> {
        let url = format!("{PRODUCT_URL}/{barcode}.json");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to reach OpenFoodFacts API")?;

        let data: ProductResponse = resp
            .json()
            .await
            .context("Failed to parse OpenFoodFacts barcode response")?;

        if data.status != 1 {
            tracing::debug!(barcode, "barcode not found on OpenFoodFacts");
            return Ok(None);
        }

        Ok(data.product.and_then(product_to_food))
    }
}

impl FoodLookupProvider for OpenFoodFactsClient {
    async fn search(&self, query: &str) -> Result<Vec<NewFood>> {
        self.search_async(query).await
    }

    async fn lookup_barcode(&self, barcode: &str) -> Result<Option<NewFood>> {
        self.lookup_barcode_async(barcode).await
    }
}
