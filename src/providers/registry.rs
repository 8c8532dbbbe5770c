use std::collections::BTreeMap;

use super::{ImageProvider, KreaImages, OpenAiImages};
use crate::Result;
use crate::env::Env;
use crate::types::ProviderCapabilities;

pub type ProviderFactory = Box<dyn Fn(&Env) -> Result<Box<dyn ImageProvider>> + Send + Sync>;

struct RegisteredProvider {
    capabilities: ProviderCapabilities,
    factory: ProviderFactory,
}

/// Maps provider names to client factories. Clients are constructed fresh per
/// `get` call so credential problems surface on use, while capability
/// metadata stays available without any credentials.
pub struct ProviderRegistry {
    providers: BTreeMap<String, RegisteredProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(
            "openai",
            OpenAiImages::capabilities_static(),
            |env: &Env| -> Result<Box<dyn ImageProvider>> {
                Ok(Box::new(OpenAiImages::from_env(env)?))
            },
        );
        registry.register(
            "krea",
            KreaImages::capabilities_static(),
            |env: &Env| -> Result<Box<dyn ImageProvider>> {
                Ok(Box::new(KreaImages::from_env(env)?))
            },
        );
        registry
    }

    pub fn empty() -> Self {
        Self {
            providers: BTreeMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        capabilities: ProviderCapabilities,
        factory: impl Fn(&Env) -> Result<Box<dyn ImageProvider>> + Send + Sync + 'static,
    ) {
        self.providers.insert(
            name.into(),
            RegisteredProvider {
                capabilities,
                factory: Box::new(factory),
            },
        );
    }

    pub fn get(&self, name: &str, env: &Env) -> Result<Box<dyn ImageProvider>> {
        let Some(registered) = self.providers.get(name) else {
            let supported: Vec<&str> = self.providers.keys().map(String::as_str).collect();
            return Err(crate::EaselError::InvalidInput(format!(
                "Unsupported provider '{name}'. Supported: {}",
                supported.join(", ")
            )));
        };
        (registered.factory)(env)
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn metadata(&self) -> BTreeMap<&str, &ProviderCapabilities> {
        self.providers
            .iter()
            .map(|(name, registered)| (name.as_str(), &registered.capabilities))
            .collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EaselError;

    #[test]
    fn unknown_provider_names_the_supported_set() {
        let registry = ProviderRegistry::new();
        let Err(err) = registry.get("midjourney", &Env::default()) else {
            panic!("expected an error for an unknown provider");
        };
        match err {
            EaselError::InvalidInput(message) => {
                assert!(message.contains("Unsupported provider 'midjourney'"));
                assert!(message.contains("krea"));
                assert!(message.contains("openai"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_credentials_surface_through_get() {
        let registry = ProviderRegistry::new();
        let env = Env::parse_dotenv("KREA_API_KEY=\n");
        // The dotenv overlay cannot unset a process-level key; skip when the
        // host environment provides one.
        if env.get("KREA_API_KEY").is_some() {
            return;
        }
        let Err(err) = registry.get("krea", &env) else {
            panic!("expected a missing-credentials error");
        };
        assert!(matches!(err, EaselError::MissingCredentials("KREA_API_KEY")));
    }

    #[test]
    fn metadata_covers_every_registered_provider() {
        let registry = ProviderRegistry::new();
        let metadata = registry.metadata();
        assert_eq!(metadata.len(), 2);
        assert!(metadata["krea"].supports_steps);
        assert_eq!(metadata["openai"].default_model, "gpt-image-1");
    }
}
