use crate::model::Service;

/// Read-only, ordered view of the bookable services.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    services: Vec<Service>,
}

impl Catalog {
    /// Inactive services are dropped; order is preserved.
    pub fn new(services: Vec<Service>) -> Self {
        Self {
            services: services.into_iter().filter(|s| s.active).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
