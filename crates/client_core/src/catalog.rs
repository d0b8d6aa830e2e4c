//! Admin resources: record bindings, filter declarations and endpoints.

use async_trait::async_trait;
use shared::{
    domain::{
        CategoryId, JobId, MediaId, PlanId, ProductId, ProviderId, ReviewId, SubcategoryId,
        SubscriptionId, UserId,
    },
    protocol::{
        Category, CategoryPayload, GalleryImage, Job, PlanPayload, Product, Provider, ReadOnly,
        Review, StatusMedia, Subcategory, SubcategoryPayload, Subscription, SubscriptionPlan, User,
    },
};

use crate::{
    error::SyncError,
    filter::{child_domain, distinct_values, FilterDef, FilterDomain, FilterState},
    resource::{fetch_list, Auxiliary, Resource},
    transport::Transport,
};

pub const CATEGORIES_PATH: &str = "/categories";
pub const SUBCATEGORIES_PATH: &str = "/subcategories";

pub mod endpoints {
    use shared::domain::ProviderId;

    use super::{CATEGORIES_PATH, SUBCATEGORIES_PATH};
    use crate::resource::Endpoint;

    pub fn users() -> Endpoint {
        Endpoint::list("/users").with_delete("/users")
    }

    pub fn providers() -> Endpoint {
        Endpoint::list("/providers").with_delete("/providers")
    }

    pub fn jobs() -> Endpoint {
        Endpoint::list("/jobs").with_delete("/jobs")
    }

    pub fn categories() -> Endpoint {
        Endpoint::crud(CATEGORIES_PATH)
    }

    pub fn subcategories() -> Endpoint {
        Endpoint::crud(SUBCATEGORIES_PATH)
    }

    pub fn reviews() -> Endpoint {
        Endpoint::list("/reviews-by-rating").with_delete("/reviews")
    }

    pub fn plans() -> Endpoint {
        Endpoint::crud("/subscription-plans").with_delete("/delete-subscription-plans")
    }

    pub fn subscriptions() -> Endpoint {
        Endpoint::list("/subscriptions")
    }

    pub fn provider_gallery(provider_id: ProviderId) -> Endpoint {
        Endpoint::list(format!("/providers/{provider_id}/gallery")).with_delete("/providers/gallery")
    }

    pub fn provider_status_media(provider_id: ProviderId) -> Endpoint {
        Endpoint::list(format!("/providers/{provider_id}/status-media"))
            .with_delete("/providers/status-media")
    }

    pub fn provider_products(provider_id: ProviderId) -> Endpoint {
        Endpoint::list(format!("/get-products/{provider_id}")).with_delete("/store/product")
    }

    pub const DASHBOARD: &str = "/dashboard";
}

/// Category tree needed by screens with chained category/subcategory filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Taxonomy {
    pub categories: Vec<Category>,
    pub subcategories: Vec<Subcategory>,
}

impl Taxonomy {
    /// Child domain of the subcategory dropdown for the selected category.
    pub fn subcategories_of(&self, category: Option<&str>) -> Vec<&Subcategory> {
        child_domain(
            &self.subcategories,
            |s| s.category_id.to_string(),
            category,
        )
    }

    pub fn category(&self, selected: &str) -> Option<&Category> {
        self.categories
            .iter()
            .find(|c| c.category_id.to_string() == selected)
    }

    pub fn subcategory(&self, selected: &str) -> Option<&Subcategory> {
        self.subcategories
            .iter()
            .find(|s| s.subcategory_id.to_string() == selected)
    }
    /// Category dropdown plus the subcategory dropdown chained to it.
    pub fn domains(&self, filters: &FilterState) -> Vec<FilterDomain> {
        vec![
            FilterDomain::new(
                "category",
                self.categories
                    .iter()
                    .map(|c| (c.category_id.to_string(), c.category_name.clone()))
                    .collect(),
            ),
            FilterDomain::new(
                "subcategory",
                self.subcategories_of(filters.get("category"))
                    .into_iter()
                    .map(|s| (s.subcategory_id.to_string(), s.subcategory_name.clone()))
                    .collect(),
            ),
        ]
    }
}

#[async_trait]
impl Auxiliary for Taxonomy {
    async fn fetch(transport: &dyn Transport) -> Result<Self, SyncError> {
        let (categories, subcategories) = futures::try_join!(
            fetch_list::<Category>(transport, CATEGORIES_PATH, &[]),
            fetch_list::<Subcategory>(transport, SUBCATEGORIES_PATH, &[]),
        )?;
        Ok(Self {
            categories,
            subcategories,
        })
    }
}

/// Categories only, for the subcategory management screen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryList {
    pub categories: Vec<Category>,
}

#[async_trait]
impl Auxiliary for CategoryList {
    async fn fetch(transport: &dyn Transport) -> Result<Self, SyncError> {
        Ok(Self {
            categories: fetch_list(transport, CATEGORIES_PATH, &[]).await?,
        })
    }
}

impl Resource for User {
    type Key = UserId;
    type Auxiliary = ();
    type Payload = ReadOnly;

    const NAME: &'static str = "users";

    fn key(&self) -> UserId {
        self.user_id
    }

    fn filters() -> Vec<FilterDef<Self>> {
        vec![
            FilterDef::text("search", |u| vec![u.full_name(), u.email.clone()]),
            FilterDef::equals("city", |u| u.city.clone()),
        ]
    }

    fn label(&self) -> String {
        format!(
            "#{} {} <{}> {}",
            self.user_id,
            self.full_name(),
            self.email,
            self.city.as_deref().unwrap_or("N/A")
        )
    }

    fn domains(users: &[Self], _filters: &FilterState, _aux: &()) -> Vec<FilterDomain> {
        vec![FilterDomain::values(
            "city",
            distinct_values(users, |u| u.city.clone()),
        )]
    }
}

fn provider_in_category(
    provider: &Provider,
    category: &str,
    _state: &FilterState,
    taxonomy: &Taxonomy,
) -> bool {
    let domain = taxonomy.subcategories_of(Some(category));
    provider
        .subcategory_ids()
        .any(|id| domain.iter().any(|s| s.subcategory_id == id))
}

fn provider_has_subcategory(
    provider: &Provider,
    subcategory: &str,
    _state: &FilterState,
    _taxonomy: &Taxonomy,
) -> bool {
    provider
        .subcategory_ids()
        .any(|id| id.to_string() == subcategory)
}

impl Resource for Provider {
    type Key = ProviderId;
    type Auxiliary = Taxonomy;
    type Payload = ReadOnly;

    const NAME: &'static str = "providers";

    fn key(&self) -> ProviderId {
        self.provider_id
    }

    fn filters() -> Vec<FilterDef<Self>> {
        vec![
            FilterDef::text("search", |p| vec![p.provider_name.clone(), p.email.clone()]),
            FilterDef::equals("city", |p| p.city.clone()),
            FilterDef::related("category", provider_in_category),
            FilterDef::related("subcategory", provider_has_subcategory).child_of("category"),
        ]
    }

    fn label(&self) -> String {
        format!(
            "#{} {} <{}> {} verified={} banned={}",
            self.provider_id,
            self.provider_name,
            self.email,
            self.city.as_deref().unwrap_or("N/A"),
            self.is_verified,
            self.is_banned
        )
    }

    fn domains(providers: &[Self], filters: &FilterState, taxonomy: &Taxonomy) -> Vec<FilterDomain> {
        let mut domains = vec![FilterDomain::values(
            "city",
            distinct_values(providers, |p| p.city.clone()),
        )];
        domains.extend(taxonomy.domains(filters));
        domains
    }
}

fn job_in_category(job: &Job, category: &str, _state: &FilterState, taxonomy: &Taxonomy) -> bool {
    match (taxonomy.category(category), job.category_name.as_deref()) {
        (Some(selected), Some(name)) => selected.category_name == name,
        _ => false,
    }
}

fn job_in_subcategory(
    job: &Job,
    subcategory: &str,
    _state: &FilterState,
    taxonomy: &Taxonomy,
) -> bool {
    match (taxonomy.subcategory(subcategory), job.subcategory_name.as_deref()) {
        (Some(selected), Some(name)) => selected.subcategory_name == name,
        _ => false,
    }
}

impl Resource for Job {
    type Key = JobId;
    type Auxiliary = Taxonomy;
    type Payload = ReadOnly;

    const NAME: &'static str = "jobs";

    fn key(&self) -> JobId {
        self.job_id
    }

    fn filters() -> Vec<FilterDef<Self>> {
        vec![
            FilterDef::text("search", |j| vec![j.title.clone()]),
            FilterDef::equals("status", |j| Some(j.status.to_string())),
            FilterDef::related("category", job_in_category),
            FilterDef::related("subcategory", job_in_subcategory).child_of("category"),
        ]
    }

    fn label(&self) -> String {
        let budget = match (self.budget_min, self.budget_max) {
            (Some(min), Some(max)) => format!("${min} - ${max}"),
            _ => "N/A".to_string(),
        };
        format!(
            "#{} {} [{}] {} / {} budget={} requests={} location={}",
            self.job_id,
            self.title,
            if self.status { "closed" } else { "open" },
            self.category_name.as_deref().unwrap_or("N/A"),
            self.subcategory_name.as_deref().unwrap_or("N/A"),
            budget,
            self.request_count,
            self.location.as_deref().unwrap_or("N/A")
        )
    }

    fn domains(_jobs: &[Self], filters: &FilterState, taxonomy: &Taxonomy) -> Vec<FilterDomain> {
        let mut domains = vec![FilterDomain::new(
            "status",
            vec![
                ("false".to_string(), "open".to_string()),
                ("true".to_string(), "closed".to_string()),
            ],
        )];
        domains.extend(taxonomy.domains(filters));
        domains
    }
}

impl Resource for Category {
    type Key = CategoryId;
    type Auxiliary = ();
    type Payload = CategoryPayload;

    const NAME: &'static str = "categories";

    fn key(&self) -> CategoryId {
        self.category_id
    }

    fn filters() -> Vec<FilterDef<Self>> {
        vec![FilterDef::text("search", |c| vec![c.category_name.clone()])]
    }

    fn label(&self) -> String {
        format!("#{} {}", self.category_id, self.category_name)
    }
}

impl Resource for Subcategory {
    type Key = SubcategoryId;
    type Auxiliary = CategoryList;
    type Payload = SubcategoryPayload;

    const NAME: &'static str = "subcategories";

    fn key(&self) -> SubcategoryId {
        self.subcategory_id
    }

    fn filters() -> Vec<FilterDef<Self>> {
        vec![
            FilterDef::text("search", |s| vec![s.subcategory_name.clone()]),
            FilterDef::equals("category", |s| Some(s.category_id.to_string())),
        ]
    }

    fn label(&self) -> String {
        format!(
            "#{} {} (category #{})",
            self.subcategory_id, self.subcategory_name, self.category_id
        )
    }

    fn domains(_subs: &[Self], _filters: &FilterState, list: &CategoryList) -> Vec<FilterDomain> {
        vec![FilterDomain::new(
            "category",
            list.categories
                .iter()
                .map(|c| (c.category_id.to_string(), c.category_name.clone()))
                .collect(),
        )]
    }
}

impl Resource for Review {
    type Key = ReviewId;
    type Auxiliary = ();
    type Payload = ReadOnly;

    const NAME: &'static str = "reviews";

    fn key(&self) -> ReviewId {
        self.review_id
    }

    fn filters() -> Vec<FilterDef<Self>> {
        vec![
            FilterDef::text("search", |r| vec![r.provider_name.clone()]),
            FilterDef::server("rating"),
        ]
    }

    fn label(&self) -> String {
        format!(
            "#{} {} {}/5 by {}: {}",
            self.review_id,
            self.provider_name,
            self.rating,
            self.user_name.as_deref().unwrap_or("anonymous"),
            self.review_text.as_deref().unwrap_or("")
        )
    }

    fn domains(_reviews: &[Self], _filters: &FilterState, _aux: &()) -> Vec<FilterDomain> {
        vec![FilterDomain::values(
            "rating",
            (1..=5).map(|r: u8| r.to_string()).collect(),
        )]
    }
}

impl Resource for SubscriptionPlan {
    type Key = PlanId;
    type Auxiliary = ();
    type Payload = PlanPayload;

    const NAME: &'static str = "plans";

    fn key(&self) -> PlanId {
        self.plan_id
    }

    fn filters() -> Vec<FilterDef<Self>> {
        vec![FilterDef::text("search", |p| vec![p.plan_name.clone()])]
    }

    fn label(&self) -> String {
        format!(
            "#{} {} ${:.2} / {} months",
            self.plan_id, self.plan_name, self.price, self.duration
        )
    }
}

impl Resource for Subscription {
    type Key = SubscriptionId;
    type Auxiliary = ();
    type Payload = ReadOnly;

    const NAME: &'static str = "subscriptions";

    fn key(&self) -> SubscriptionId {
        self.subscription_id
    }

    fn filters() -> Vec<FilterDef<Self>> {
        vec![
            FilterDef::text("search", |s| {
                vec![s.provider_name.clone(), s.provider_email.clone()]
            }),
            FilterDef::equals("status", |s| s.payment_status.clone()),
            FilterDef::equals("plan", |s| s.plan_name.clone()),
        ]
    }

    fn label(&self) -> String {
        format!(
            "#{} {} <{}> plan={} status={} {} -> {}",
            self.subscription_id,
            self.provider_name,
            self.provider_email,
            self.plan_name.as_deref().unwrap_or("N/A"),
            self.payment_status.as_deref().unwrap_or("N/A"),
            self.start_date.as_deref().unwrap_or("?"),
            self.end_date.as_deref().unwrap_or("?")
        )
    }

    fn domains(subs: &[Self], _filters: &FilterState, _aux: &()) -> Vec<FilterDomain> {
        vec![
            FilterDomain::values("status", distinct_values(subs, |s| s.payment_status.clone())),
            FilterDomain::values("plan", distinct_values(subs, |s| s.plan_name.clone())),
        ]
    }
}

impl Resource for GalleryImage {
    type Key = MediaId;
    type Auxiliary = ();
    type Payload = ReadOnly;

    const NAME: &'static str = "gallery";

    fn key(&self) -> MediaId {
        self.id
    }

    fn filters() -> Vec<FilterDef<Self>> {
        Vec::new()
    }

    fn label(&self) -> String {
        format!("#{} {}", self.id, self.image_url)
    }
}

impl Resource for StatusMedia {
    type Key = MediaId;
    type Auxiliary = ();
    type Payload = ReadOnly;

    const NAME: &'static str = "status-media";

    fn key(&self) -> MediaId {
        self.id
    }

    fn filters() -> Vec<FilterDef<Self>> {
        Vec::new()
    }

    fn label(&self) -> String {
        format!("#{} {:?} {}", self.id, self.media_type, self.media_url)
    }
}

impl Resource for Product {
    type Key = ProductId;
    type Auxiliary = ();
    type Payload = ReadOnly;

    const NAME: &'static str = "products";

    fn key(&self) -> ProductId {
        self.product_id
    }

    fn filters() -> Vec<FilterDef<Self>> {
        vec![FilterDef::text("search", |p| vec![p.title.clone()])]
    }

    fn label(&self) -> String {
        let price = self
            .price
            .map(|p| format!("${p:.2}"))
            .unwrap_or_else(|| "N/A".to_string());
        format!(
            "#{} {} {} ({} images)",
            self.product_id,
            self.title,
            price,
            self.image_urls.len()
        )
    }
}

#[cfg(test)]
#[path = "tests/catalog_tests.rs"]
mod tests;
