//! Controlled-vocabulary collaborator: SPARQL queries against the
//! Geoscience Knowledgebase. A failed lookup degrades linkage for the
//! batch; it never aborts processing.

use crate::config::VocabularyConfig;
use crate::error::Result;
use crate::ports::{VocabularyCategory, VocabularySource};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

const COMMODITIES_QUERY: &str = r#"
PREFIX wd: <https://geokb.wikibase.cloud/entity/>
PREFIX wdt: <https://geokb.wikibase.cloud/prop/direct/>

SELECT ?item ?itemLabel
WHERE {
    ?item wdt:P1 wd:Q406 .
    SERVICE wikibase:label { bd:serviceParam wikibase:language "en" . }
}
"#;

const PLACES_QUERY: &str = r#"
PREFIX wd: <https://geokb.wikibase.cloud/entity/>
PREFIX wdt: <https://geokb.wikibase.cloud/prop/direct/>

SELECT ?item ?itemLabel ?geonames_feature_code
WHERE {
    ?item wdt:P211 ?geonames_feature_code .
    FILTER(STRSTARTS(STR(?geonames_feature_code), "ADM"))
    SERVICE wikibase:label { bd:serviceParam wikibase:language "en" . }
}
"#;

pub struct GeoKbVocabulary {
    client: reqwest::Client,
    sparql_endpoint: String,
    user_agent: String,
}

impl GeoKbVocabulary {
    pub fn new(config: &VocabularyConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            sparql_endpoint: config.sparql_endpoint.clone(),
            user_agent: config.user_agent.clone(),
        }
    }

    /// Runs a SELECT query and returns (label, entity id) pairs. Entity ids
    /// are the trailing segment of the item URI.
    async fn sparql_query(&self, query: &str) -> Result<Vec<(String, String)>> {
        let response = self
            .client
            .post(&self.sparql_endpoint)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .header(reqwest::header::ACCEPT, "application/sparql-results+json")
            .form(&[("query", query)])
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        let bindings = body["results"]["bindings"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let pairs: Vec<(String, String)> = bindings
            .iter()
            .filter_map(|binding| {
                let label = binding["itemLabel"]["value"].as_str()?;
                let uri = binding["item"]["value"].as_str()?;
                let id = uri.rsplit('/').next()?;
                Some((label.to_string(), id.to_string()))
            })
            .collect();

        debug!("SPARQL query returned {} bindings", pairs.len());
        Ok(pairs)
    }
}

#[async_trait]
impl VocabularySource for GeoKbVocabulary {
    async fn lookup(&self, category: VocabularyCategory) -> Result<HashMap<String, String>> {
        let (query, lowercase) = match category {
            VocabularyCategory::Commodities => (COMMODITIES_QUERY, true),
            VocabularyCategory::AdministrativePlaces => (PLACES_QUERY, false),
        };

        let pairs = self.sparql_query(query).await?;
        Ok(pairs
            .into_iter()
            .map(|(label, id)| {
                let term = if lowercase { label.to_lowercase() } else { label };
                (term, id)
            })
            .collect())
    }
}
