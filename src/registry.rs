//! Keeps track of opened links, so that one address is driven by one link.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tracing::{debug, warn};

use crate::{
    client::{lock, LinkClient},
    error::Error,
};

/// Links by address.
#[derive(Default)]
pub struct PortRegistry {
    links: Mutex<HashMap<String, Arc<LinkClient>>>,
}

impl PortRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a link under its address.
    pub fn add(&self, link: Arc<LinkClient>) -> Result<(), Error> {
        let mut links = lock(&self.links);
        let address = link.address().to_string();

        if links.contains_key(&address) {
            return Err(Error::AlreadyRegistered(address));
        }

        debug!(%address, "Registered link");
        links.insert(address, link);

        Ok(())
    }

    /// The link registered for an address.
    pub fn get(&self, address: &str) -> Option<Arc<LinkClient>> {
        lock(&self.links).get(address).cloned()
    }

    /// Forget a link, returning it.
    /// The link is not closed.
    pub fn remove(&self, address: &str) -> Option<Arc<LinkClient>> {
        lock(&self.links).remove(address)
    }

    /// Registered addresses, sorted.
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<_> = lock(&self.links).keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Forget and close every link.
    pub async fn close_all(&self) {
        let links: Vec<_> = lock(&self.links).drain().map(|(_, link)| link).collect();

        let closed = futures::future::join_all(links.iter().map(|link| link.close())).await;

        for (link, result) in links.iter().zip(closed) {
            if let Err(e) = result {
                warn!(address = %link.address(), %e, "Problem closing link");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{options::LinkOptions, transport::mock::MockHandle};

    fn link(address: &str) -> Arc<LinkClient> {
        Arc::new(LinkClient::new(
            LinkOptions::builder(address).build(),
            MockHandle::new().connector(),
        ))
    }

    #[test]
    fn one_link_per_address() {
        let registry = PortRegistry::new();

        registry.add(link("/dev/ttyUSB0")).unwrap();
        registry.add(link("/dev/ttyUSB1")).unwrap();

        assert!(matches!(
            registry.add(link("/dev/ttyUSB0")),
            Err(Error::AlreadyRegistered(address)) if address == "/dev/ttyUSB0"
        ));
        assert_eq!(registry.addresses(), vec!["/dev/ttyUSB0", "/dev/ttyUSB1"]);
    }

    #[test]
    fn get_and_remove() {
        let registry = PortRegistry::new();
        registry.add(link("COM1")).unwrap();

        assert_eq!(registry.get("COM1").unwrap().address(), "COM1");
        assert!(registry.get("COM2").is_none());

        assert!(registry.remove("COM1").is_some());
        assert!(registry.get("COM1").is_none());
        assert!(registry.add(link("COM1")).is_ok());
    }

    #[tokio::test]
    async fn close_all_closes_and_forgets() {
        let registry = PortRegistry::new();
        let first = link("COM1");
        let second = link("COM2");
        first.start().unwrap();
        second.start().unwrap();
        registry.add(first.clone()).unwrap();
        registry.add(second.clone()).unwrap();

        registry.close_all().await;

        assert!(registry.addresses().is_empty());
        assert!(!first.opened());
        assert!(!second.opened());
    }
}
