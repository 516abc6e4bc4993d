//! Scripted storefront for scenario tests
//!
//! Answers a fixed set of selectors for a product page and a cart page.
//! Anything it does not recognise matches nothing.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::browser::{BrowserSession, Element, ErrorLog, SessionFactory};
use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Enabled,
    Disabled,
    Hidden,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutState {
    Enabled,
    Disabled,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlusBehaviour {
    Works,
    Inert,
    Throws(String),
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub title: Option<String>,
    pub price: Option<String>,
    pub add_button: ButtonState,
    /// Colour radios with the second option unselected
    pub variants: bool,
    pub variant_enables_button: bool,
    pub sold_out: bool,
    pub add_works: bool,
    pub badge_updates: bool,
    pub checkout: CheckoutState,
    pub plus_button: Option<PlusBehaviour>,
    pub load_error: Option<String>,
    pub drop_session_on_cart: bool,
    /// The first lookup of this selector fails with a driver error
    pub flaky_selector: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            title: Some("Trail Bike".to_string()),
            price: Some("$999.00".to_string()),
            add_button: ButtonState::Enabled,
            variants: false,
            variant_enables_button: true,
            sold_out: false,
            add_works: true,
            badge_updates: true,
            checkout: CheckoutState::Enabled,
            plus_button: Some(PlusBehaviour::Works),
            load_error: None,
            drop_session_on_cart: false,
            flaky_selector: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Page {
    Blank,
    Product,
    Cart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Plain,
    AddButton,
    Variant,
    ProductQuantity,
    HeaderRow,
    ItemRow,
    Plus,
    Recommendations,
}

pub struct FakeStorefront {
    config: StoreConfig,
    page: Page,
    url: String,
    cart_qty: u32,
    product_qty: String,
    variant_selected: bool,
    targets: HashMap<u64, Target>,
    next_handle: u64,
    errors: ErrorLog,
    flaked: bool,
}

impl FakeStorefront {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            page: Page::Blank,
            url: "about:blank".to_string(),
            cart_qty: 0,
            product_qty: "1".to_string(),
            variant_selected: false,
            targets: HashMap::new(),
            next_handle: 1,
            errors: ErrorLog::new(),
            flaked: false,
        }
    }

    fn element(&mut self, target: Target, tag: &str, text: &str, attrs: &[(&str, &str)]) -> Element {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.targets.insert(handle, target);
        Element {
            handle,
            tag: tag.to_string(),
            visible: true,
            enabled: true,
            checked: false,
            text: text.to_string(),
            value: None,
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn add_enabled(&self) -> bool {
        match self.config.add_button {
            ButtonState::Enabled => true,
            ButtonState::Disabled => {
                self.config.variants && self.variant_selected && self.config.variant_enables_button
            }
            ButtonState::Hidden | ButtonState::Missing => false,
        }
    }

    fn badge(&mut self) -> Vec<Element> {
        let count = if self.config.badge_updates { self.cart_qty } else { 0 };
        vec![self.element(Target::Plain, "span", &count.to_string(), &[])]
    }

    fn radio(&mut self, id: &str, value: &str, checked: bool) -> Element {
        let mut radio = self.element(
            Target::Variant,
            "input",
            "",
            &[("id", id), ("name", "Color"), ("value", value), ("type", "radio")],
        );
        radio.checked = checked;
        radio
    }

    fn product_page(&mut self, selector: &str) -> Vec<Element> {
        match selector {
            "body" | "header" | "main" => vec![self.element(Target::Plain, selector, "", &[])],
            "h1.product-meta__title" => match self.config.title.clone() {
                Some(title) => vec![self.element(Target::Plain, "h1", &title, &[])],
                None => Vec::new(),
            },
            ".price--highlight" => match self.config.price.clone() {
                Some(price) => vec![self.element(Target::Plain, "span", &price, &[])],
                None => Vec::new(),
            },
            "button[name='add']" => {
                if self.config.add_button == ButtonState::Missing {
                    return Vec::new();
                }
                let mut button = self.element(Target::AddButton, "button", "Add to cart", &[("name", "add")]);
                button.visible = self.config.add_button != ButtonState::Hidden;
                button.enabled = self.add_enabled();
                vec![button]
            }
            "input[type='radio'].product-form__single-selector:not(:checked)" => {
                if self.config.variants && !self.variant_selected {
                    vec![self.radio("variant-2", "Red", false)]
                } else {
                    Vec::new()
                }
            }
            "input[type='radio'].product-form__single-selector" => {
                if !self.config.variants {
                    return Vec::new();
                }
                let selected = self.variant_selected;
                vec![
                    self.radio("variant-1", "Black", !selected),
                    self.radio("variant-2", "Red", selected),
                ]
            }
            "label[for='variant-2']" if self.config.variants => {
                vec![self.element(Target::Variant, "label", "Red", &[("for", "variant-2")])]
            }
            ".sold-out" if self.config.sold_out => {
                vec![self.element(Target::Plain, "span", "Sold out", &[])]
            }
            "input[name='quantity']" => {
                let mut input = self.element(
                    Target::ProductQuantity,
                    "input",
                    "",
                    &[("name", "quantity"), ("type", "number")],
                );
                input.value = Some(self.product_qty.clone());
                vec![input]
            }
            "img[src*='product']" => vec![self.element(
                Target::Plain,
                "img",
                "",
                &[("src", "/products/trail-bike.jpg")],
            )],
            ".product__description" => vec![self.element(
                Target::Plain,
                "div",
                "A light aluminium trail bike with hydraulic brakes.",
                &[],
            )],
            ".product-recommendations" => {
                vec![self.element(Target::Recommendations, "section", "", &[])]
            }
            _ => Vec::new(),
        }
    }

    fn cart_page(&mut self, selector: &str) -> Vec<Element> {
        let has_items = self.cart_qty > 0;
        match selector {
            "body" | "header" | "main" => vec![self.element(Target::Plain, selector, "", &[])],
            "tr" => {
                let mut rows = vec![self.element(Target::HeaderRow, "tr", "Product Quantity Total", &[])];
                if has_items {
                    rows.push(self.element(Target::ItemRow, "tr", "Trail Bike", &[("class", "cart-item")]));
                }
                rows
            }
            "tr.cart-item" if has_items => {
                vec![self.element(Target::ItemRow, "tr", "Trail Bike", &[("class", "cart-item")])]
            }
            "input[type='number']" if has_items => {
                let mut input = self.element(Target::Plain, "input", "", &[("type", "number")]);
                input.value = Some(self.cart_qty.to_string());
                vec![input]
            }
            ".cart-empty" if !has_items => {
                vec![self.element(Target::Plain, "p", "Your cart is empty", &[])]
            }
            "button[name='checkout']" if has_items => match self.config.checkout {
                CheckoutState::Missing => Vec::new(),
                state => {
                    let mut button =
                        self.element(Target::Plain, "button", "Check out", &[("name", "checkout")]);
                    button.enabled = state == CheckoutState::Enabled;
                    vec![button]
                }
            },
            "button[name='checkout'][disabled]"
                if has_items && self.config.checkout == CheckoutState::Disabled =>
            {
                vec![self.element(Target::Plain, "button", "Check out", &[("name", "checkout")])]
            }
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl BrowserSession for FakeStorefront {
    async fn navigate(&mut self, url: &str) -> E2eResult<()> {
        self.targets.clear();
        if url.contains("/cart") {
            if self.config.drop_session_on_cart {
                return Err(E2eError::SessionClosed);
            }
            self.page = Page::Cart;
        } else {
            if let Some(reason) = &self.config.load_error {
                return Err(E2eError::Navigation {
                    url: url.to_string(),
                    reason: reason.clone(),
                });
            }
            self.page = Page::Product;
        }
        self.url = url.to_string();
        Ok(())
    }

    async fn current_url(&mut self) -> E2eResult<String> {
        Ok(self.url.clone())
    }

    async fn title(&mut self) -> E2eResult<String> {
        Ok(match self.page {
            Page::Cart => "Your Shopping Cart".to_string(),
            _ => format!("{} | Shop", self.config.title.clone().unwrap_or_default()),
        })
    }

    async fn find(&mut self, selector: &str) -> E2eResult<Vec<Element>> {
        if !self.flaked && self.config.flaky_selector.as_deref() == Some(selector) {
            self.flaked = true;
            return Err(E2eError::Driver(format!("lookup of {} timed out", selector)));
        }
        // the header badge is on every page
        if selector == ".cart-count" && self.page != Page::Blank {
            return Ok(self.badge());
        }
        Ok(match self.page {
            Page::Blank => Vec::new(),
            Page::Product => self.product_page(selector),
            Page::Cart => self.cart_page(selector),
        })
    }

    async fn find_within(&mut self, parent: &Element, selector: &str) -> E2eResult<Vec<Element>> {
        let target = self.targets.get(&parent.handle).copied();
        Ok(match (target, selector) {
            (Some(Target::ItemRow), "button, a") => {
                let mut controls = Vec::new();
                if self.config.plus_button.is_some() {
                    controls.push(self.element(Target::Plus, "button", "+", &[("class", "quantity__button")]));
                }
                controls.push(self.element(Target::Plain, "a", "Remove", &[("href", "/cart/change?quantity=0")]));
                controls
            }
            (Some(Target::Recommendations), ".product-card") => (0..3)
                .map(|_| self.element(Target::Plain, "div", "Related bike", &[]))
                .collect(),
            _ => Vec::new(),
        })
    }

    async fn click(&mut self, element: &Element) -> E2eResult<()> {
        match self.targets.get(&element.handle).copied() {
            Some(Target::AddButton) => {
                if self.add_enabled() && self.config.add_works {
                    self.cart_qty += 1;
                }
            }
            Some(Target::Variant) => self.variant_selected = true,
            Some(Target::Plus) => match &self.config.plus_button {
                Some(PlusBehaviour::Works) => self.cart_qty += 1,
                Some(PlusBehaviour::Throws(message)) => self.errors.push(message.clone()),
                Some(PlusBehaviour::Inert) | None => {}
            },
            Some(_) => {}
            None => return Err(E2eError::Driver(format!("stale handle {}", element.handle))),
        }
        Ok(())
    }

    async fn fill(&mut self, element: &Element, value: &str) -> E2eResult<()> {
        match self.targets.get(&element.handle) {
            Some(Target::ProductQuantity) => {
                self.product_qty = value.to_string();
                Ok(())
            }
            _ => Err(E2eError::Driver("element is not an input".to_string())),
        }
    }

    async fn evaluate(&mut self, _script: &str) -> E2eResult<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn wait(&mut self, _ms: u64) -> E2eResult<()> {
        Ok(())
    }

    fn errors(&self) -> ErrorLog {
        self.errors.clone()
    }

    async fn close(&mut self) -> E2eResult<()> {
        Ok(())
    }
}

pub struct FakeFactory {
    config: Option<StoreConfig>,
}

impl FakeFactory {
    pub fn new(config: StoreConfig) -> Self {
        Self { config: Some(config) }
    }

    /// A factory whose browser never starts
    pub fn failing() -> Self {
        Self { config: None }
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn open(&self) -> E2eResult<Box<dyn BrowserSession>> {
        match &self.config {
            Some(config) => Ok(Box::new(FakeStorefront::new(config.clone()))),
            None => Err(E2eError::DriverNotFound),
        }
    }
}
