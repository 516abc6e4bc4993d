//! Step state machine
//!
//! Runs the ordered steps of one product scenario against a browser session.
//! Each step goes `start -> body -> complete`. A step body that errors fails
//! only that step, unless the error is fatal for the session or the page
//! could not be opened at all, in which case the remaining steps stay pending
//! and the error is recorded on the scenario.

use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, warn};

use shopguard_common::{
    DisabledCheckoutPolicy, IssueDetails, Product, ScenarioResult, Step, StepStatus, TestMode,
};

use crate::browser::{
    find_first, find_visible, lookup, BrowserSession, Element, ErrorLog, SessionFactory,
};
use crate::classifier::classify;
use crate::error::E2eResult;
use crate::reporter::ProgressSink;
use crate::selectors;

const PAGE_SETTLE_MS: u64 = 3000;
const CART_SETTLE_MS: u64 = 2000;
const ADD_SETTLE_MS: u64 = 2000;
const CART_SYNC_MS: u64 = 5000;
const CONTROL_SETTLE_MS: u64 = 500;
const INPUT_SETTLE_MS: u64 = 300;
const PROBE_SETTLE_MS: u64 = 1500;

/// Script errors attached to an issue
const JS_ERROR_TAIL: usize = 5;

const EVENT_BINDING_HINT: &str = "[Event binding] The button's click handler is missing or blocked. Possible causes:
- the click handler was never bound, or was bound to another element
- stopPropagation() or preventDefault() swallows the click
- the code that binds the handler never ran
- a transparent overlay covers the button
Suggested fix: check the handler binding and confirm it runs on click.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepKind {
    PageAccess,
    ProductInfo,
    PageStructure,
    Title,
    Price,
    Images,
    Description,
    Variants,
    Quantity,
    AddToCart,
    CartVerification,
    Recommendations,
    Checkout,
}

fn plan(mode: TestMode) -> Vec<(StepKind, &'static str, &'static str)> {
    use StepKind::*;
    match mode {
        TestMode::Quick => vec![
            (PageAccess, "Page access", "Open the product page and check that it loads"),
            (ProductInfo, "Product info display", "Check that the product title and price are displayed"),
            (AddToCart, "Add to cart", "Click the add-to-cart button and check that it responds"),
            (CartVerification, "Cart verification", "Check that the cart now contains the product"),
            (Checkout, "Checkout flow", "Open the cart page and check that checkout is available"),
        ],
        TestMode::Full => vec![
            (PageAccess, "Page access", "Open the product page and wait for it to load"),
            (PageStructure, "Page structure", "Check the basic page layout (body, header, main)"),
            (Title, "Product title", "Check that the product title is displayed"),
            (Price, "Price", "Check that the price is displayed"),
            (Images, "Product images", "Check that product images are present"),
            (Description, "Description", "Check that a product description is present"),
            (Variants, "Variant selection", "Switch colour, model and accessory options"),
            (Quantity, "Quantity selection", "Change the quantity on the product page"),
            (AddToCart, "Add to cart", "Click the add-to-cart button"),
            (CartVerification, "Cart verification", "Check that the cart count changed"),
            (Recommendations, "Related recommendations", "Check that related products are shown"),
            (Checkout, "Checkout flow", "Adjust the cart quantity and check that checkout is available"),
        ],
    }
}

/// Pending steps for a mode
pub fn planned_steps(mode: TestMode) -> Vec<Step> {
    plan(mode)
        .into_iter()
        .enumerate()
        .map(|(i, (_, name, description))| Step::new(i as u32 + 1, name, description))
        .collect()
}

/// `<scheme>://<host>/cart` for a product URL
pub fn cart_url_for(product_url: &str) -> String {
    let origin_end = product_url
        .find("://")
        .map(|i| i + 3)
        .and_then(|start| product_url[start..].find('/').map(|j| start + j))
        .unwrap_or(product_url.len());
    format!("{}/cart", &product_url[..origin_end])
}

#[derive(Debug, Clone, Default)]
pub struct ScenarioOptions {
    /// Cart page; derived from the product URL when unset
    pub cart_url: Option<String>,
    pub disabled_checkout: DisabledCheckoutPolicy,
}

struct Outcome {
    status: StepStatus,
    message: String,
    error: Option<String>,
    issue: Option<IssueDetails>,
}

impl Outcome {
    fn new(status: StepStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error: None,
            issue: None,
        }
    }

    fn passed(message: impl Into<String>) -> Self {
        Self::new(StepStatus::Passed, message)
    }

    fn failed(message: impl Into<String>) -> Self {
        Self::new(StepStatus::Failed, message)
    }

    fn skipped(message: impl Into<String>) -> Self {
        Self::new(StepStatus::Skipped, message)
    }

    fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    fn with_issue(mut self, issue: IssueDetails) -> Self {
        self.issue = Some(issue);
        self
    }
}

/// Runs scenarios, opening a fresh browser session for each one
pub struct ScenarioRunner<F: SessionFactory> {
    factory: F,
    options: ScenarioOptions,
}

impl<F: SessionFactory> ScenarioRunner<F> {
    pub fn new(factory: F, options: ScenarioOptions) -> Self {
        Self { factory, options }
    }

    /// Run one product. Only a session that cannot be opened is an error;
    /// everything after that ends up in the returned result.
    pub async fn run(
        &self,
        product: &Product,
        mode: TestMode,
        sink: &mut dyn ProgressSink,
    ) -> E2eResult<ScenarioResult> {
        let started = Instant::now();
        let session = self.factory.open().await?;

        let mut scenario = Scenario::new(session, product, mode, &self.options, sink);
        scenario.execute().await;
        let (mut session, steps, errors) = scenario.into_parts();

        if let Err(e) = session.close().await {
            warn!("Failed to close browser session: {}", e);
        }

        let duration = (started.elapsed().as_secs_f64() * 100.0).round() / 100.0;
        let result = ScenarioResult::new(&product.id, &product.name, mode, steps, errors, duration);
        let counts = result.counts();
        info!(
            "Scenario {} finished: {} ({} passed, {} failed, {} skipped, {:.2}s)",
            product.id, result.status, counts.passed, counts.failed, counts.skipped, duration
        );
        Ok(result)
    }
}

struct Scenario<'a> {
    session: Box<dyn BrowserSession>,
    product: &'a Product,
    options: &'a ScenarioOptions,
    sink: &'a mut dyn ProgressSink,
    js: ErrorLog,
    kinds: Vec<StepKind>,
    steps: Vec<Step>,
    errors: Vec<String>,
}

impl<'a> Scenario<'a> {
    fn new(
        session: Box<dyn BrowserSession>,
        product: &'a Product,
        mode: TestMode,
        options: &'a ScenarioOptions,
        sink: &'a mut dyn ProgressSink,
    ) -> Self {
        let js = session.errors();
        Self {
            session,
            product,
            options,
            sink,
            js,
            kinds: plan(mode).into_iter().map(|(kind, _, _)| kind).collect(),
            steps: planned_steps(mode),
            errors: Vec::new(),
        }
    }

    fn into_parts(self) -> (Box<dyn BrowserSession>, Vec<Step>, Vec<String>) {
        (self.session, self.steps, self.errors)
    }

    async fn execute(&mut self) {
        for index in 0..self.steps.len() {
            let kind = self.kinds[index];
            self.begin(index);

            match self.run_step(kind).await {
                Ok(outcome) => self.finish(index, outcome),
                Err(e) => {
                    let name = self.steps[index].name.clone();
                    warn!("Step {} ({}) raised an error: {}", index + 1, name, e);
                    let issue = self.issue(
                        &format!("Running the '{}' step", name),
                        &self.steps[index].description.clone(),
                        e.to_string(),
                        "[Unexpected error] The step raised an error before it could finish.",
                        self.js.tail(JS_ERROR_TAIL),
                    );
                    self.finish(
                        index,
                        Outcome::failed(format!("{} could not complete", name))
                            .with_error(e.to_string())
                            .with_issue(issue),
                    );
                    if e.is_fatal() || kind == StepKind::PageAccess {
                        self.errors.push(e.to_string());
                        break;
                    }
                }
            }
        }
    }

    fn begin(&mut self, index: usize) {
        let step = &mut self.steps[index];
        if let Err(e) = step.start() {
            warn!("Step {} not started: {}", step.number, e);
            return;
        }
        info!("[Step {}] {}", step.number, step.name);
        self.sink.step_started(step);
    }

    fn finish(&mut self, index: usize, outcome: Outcome) {
        let step = &mut self.steps[index];
        if let Err(e) = step.complete(outcome.status, outcome.message, outcome.error, outcome.issue) {
            warn!("Step {} not completed: {}", step.number, e);
            return;
        }
        info!("Step {} {}: {}", step.number, step.status, step.message);
        self.sink.step_finished(step);
    }

    async fn run_step(&mut self, kind: StepKind) -> E2eResult<Outcome> {
        match kind {
            StepKind::PageAccess => self.page_access().await,
            StepKind::ProductInfo => self.product_info().await,
            StepKind::PageStructure => self.page_structure().await,
            StepKind::Title => self.title().await,
            StepKind::Price => self.price().await,
            StepKind::Images => self.images().await,
            StepKind::Description => self.description().await,
            StepKind::Variants => self.variants().await,
            StepKind::Quantity => self.quantity().await,
            StepKind::AddToCart => self.add_to_cart().await,
            StepKind::CartVerification => self.cart_verification().await,
            StepKind::Recommendations => self.recommendations().await,
            StepKind::Checkout => self.checkout().await,
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn cart_url(&self) -> String {
        self.options
            .cart_url
            .clone()
            .unwrap_or_else(|| cart_url_for(&self.product.url))
    }

    /// Root cause from captured script errors plus a situational hint
    fn issue(
        &self,
        scenario: &str,
        operation: &str,
        problem: impl Into<String>,
        hint: &str,
        js_errors: Vec<String>,
    ) -> IssueDetails {
        let root_cause = if js_errors.is_empty() {
            hint.to_string()
        } else {
            format!("{}\n{}", classify(&js_errors), hint)
        };
        IssueDetails {
            scenario: scenario.to_string(),
            operation: operation.to_string(),
            problem: problem.into(),
            root_cause,
            js_errors,
        }
    }

    /// Non-fatal lookup errors count as no match
    async fn find(&mut self, selector: &str) -> E2eResult<Vec<Element>> {
        lookup(self.session.as_mut(), selector).await
    }

    async fn find_within(&mut self, parent: &Element, selector: &str) -> E2eResult<Vec<Element>> {
        match self.session.find_within(parent, selector).await {
            Ok(elements) => Ok(elements),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!("Lookup {} failed: {}", selector, e);
                Ok(Vec::new())
            }
        }
    }

    async fn any_present(&mut self, candidates: &[&str]) -> E2eResult<bool> {
        Ok(find_first(self.session.as_mut(), candidates).await?.is_some())
    }

    async fn find_title(&mut self) -> E2eResult<Option<String>> {
        let mut candidates: Vec<String> = Vec::new();
        if let Some(custom) = &self.product.selectors.product_title {
            candidates.push(custom.clone());
        }
        candidates.extend(selectors::TITLE.iter().map(|s| s.to_string()));

        for selector in &candidates {
            for element in self.find(selector).await? {
                let text = element.text.trim();
                if element.visible && !text.is_empty() && !selectors::is_error_title(text) {
                    debug!("Title found via {}", selector);
                    return Ok(Some(text.to_string()));
                }
            }
        }
        Ok(None)
    }

    async fn find_price(&mut self) -> E2eResult<Option<String>> {
        for selector in selectors::PRICE {
            let elements = self.find(selector).await?;
            if selector.starts_with("meta") {
                let content = elements
                    .iter()
                    .filter_map(|e| e.attr("content"))
                    .map(str::trim)
                    .find(|c| !c.is_empty());
                if let Some(content) = content {
                    return Ok(Some(format!("${}", content)));
                }
            } else if let Some(element) = elements
                .iter()
                .find(|e| e.visible && !e.text.trim().is_empty())
            {
                return Ok(Some(element.text.trim().to_string()));
            }
        }
        Ok(None)
    }

    async fn add_button(&mut self) -> E2eResult<(Option<Element>, String)> {
        match self.product.selectors.add_to_cart_button.clone() {
            Some(selector) => {
                let button = self.find(&selector).await?.into_iter().next();
                Ok((button, selector))
            }
            None => {
                let button = find_first(self.session.as_mut(), selectors::ADD_TO_CART).await?;
                Ok((button, selectors::ADD_TO_CART.join(", ")))
            }
        }
    }

    /// Click the label of the first unselected variant option
    async fn select_first_variant(&mut self) -> E2eResult<Option<String>> {
        for selector in selectors::UNSELECTED_VARIANT {
            let Some(radio) = self.find(selector).await?.into_iter().next() else {
                continue;
            };
            let Some(id) = radio.attr("id").map(str::to_string) else {
                continue;
            };
            let target = self
                .find(&selectors::label_for(&id))
                .await?
                .into_iter()
                .next()
                .unwrap_or(radio);

            match self.session.click(&target).await {
                Ok(()) => {
                    self.session.wait(CONTROL_SETTLE_MS).await?;
                    info!("Selected variant {}", id);
                    return Ok(Some(id));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!("Could not select variant {}: {}", id, e),
            }
        }
        Ok(None)
    }

    async fn cart_item_count(&mut self) -> E2eResult<usize> {
        for selector in selectors::CART_ITEM {
            let count = self.find(selector).await?.len();
            if count > 0 {
                return Ok(count);
            }
        }
        Ok(0)
    }

    async fn cart_quantity(&mut self) -> E2eResult<Option<u32>> {
        Ok(self
            .find(selectors::CART_QUANTITY)
            .await?
            .first()
            .and_then(|input| input_value(input).trim().parse().ok()))
    }

    async fn quantity_input(&mut self) -> E2eResult<Option<Element>> {
        find_first(self.session.as_mut(), selectors::QUANTITY_INPUT).await
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    async fn page_access(&mut self) -> E2eResult<Outcome> {
        let url = self.product.url.clone();
        self.session.navigate(&url).await?;
        self.session.wait(PAGE_SETTLE_MS).await?;
        let current = self.session.current_url().await?;
        Ok(Outcome::passed(format!("Page loaded: {}", current)))
    }

    async fn product_info(&mut self) -> E2eResult<Outcome> {
        let title = self.find_title().await?;
        let price = self.find_price().await?;

        Ok(match (title, price) {
            (Some(title), Some(price)) => Outcome::passed(format!(
                "Title and price displayed (title: {}, price: {})",
                excerpt(&title, 40),
                price
            )),
            (Some(title), None) => Outcome::passed(format!(
                "Title displayed: {} (no price detected, possibly an accessory or free item)",
                excerpt(&title, 40)
            )),
            (None, Some(price)) => {
                let issue = self.issue(
                    "Shopper views the product page",
                    "Look for the product title and price",
                    format!("A price ({}) is shown but no product title was found", price),
                    "[Page structure] The product title is missing or uses an unexpected class. Possible causes:
- the page did not finish loading
- the theme uses a non-standard title class
- a script error stopped the page from rendering",
                    self.js.tail(JS_ERROR_TAIL),
                );
                Outcome::failed("Product info incomplete: price shown but no title").with_issue(issue)
            }
            (None, None) => {
                let issue = self.issue(
                    "Shopper views the product page",
                    "Look for the product title and price",
                    "Neither a product title nor a price was found",
                    "[Page failed to load] The core product information is missing. Possible causes:
- the server returned an error page (502/503)
- the product is unpublished or no longer exists
- a script error stopped the content from rendering",
                    self.js.tail(JS_ERROR_TAIL),
                );
                Outcome::failed("Product info missing: no title and no price").with_issue(issue)
            }
        })
    }

    async fn page_structure(&mut self) -> E2eResult<Outcome> {
        let mut missing = Vec::new();
        if self.find("body").await?.is_empty() {
            missing.push("body");
        }
        if !self.any_present(selectors::STRUCTURE_HEADER).await? {
            missing.push("header");
        }
        if !self.any_present(selectors::STRUCTURE_MAIN).await? {
            missing.push("main");
        }

        Ok(if missing.is_empty() {
            Outcome::passed("Page structure complete (body, header and main present)")
        } else {
            Outcome::passed(format!(
                "Page loaded but structure is incomplete (missing: {})",
                missing.join(", ")
            ))
        })
    }

    async fn title(&mut self) -> E2eResult<Outcome> {
        if let Some(title) = self.find_title().await? {
            return Ok(Outcome::passed(format!("Product title: {}", excerpt(&title, 60))));
        }
        let issue = self.issue(
            "Shopper views the product page",
            "Look for the product title",
            "No product title, or only an error-page title, was found",
            "[Page structure] The product title is missing or uses an unexpected class. Possible causes:
- the page did not finish loading
- the theme uses a non-standard title class
- the server returned an error page",
            self.js.tail(JS_ERROR_TAIL),
        );
        Ok(Outcome::failed("Product title not found").with_issue(issue))
    }

    async fn price(&mut self) -> E2eResult<Outcome> {
        if let Some(price) = self.find_price().await? {
            return Ok(Outcome::passed(format!("Price displayed: {}", price)));
        }
        let issue = self.issue(
            "Shopper views the product page",
            "Look for the product price",
            "No visible price was found",
            "[Page structure] No price element was found. Possible causes:
- the price is rendered by a script that failed
- the theme uses a non-standard price class",
            self.js.tail(JS_ERROR_TAIL),
        );
        Ok(Outcome::failed("Price not found").with_issue(issue))
    }

    async fn images(&mut self) -> E2eResult<Outcome> {
        let mut sources = HashSet::new();
        let mut visible = 0;
        for selector in selectors::PRODUCT_IMAGE {
            for image in self.find(selector).await? {
                let source = image
                    .attr("src")
                    .filter(|s| s.to_lowercase().contains("product"))
                    .or_else(|| {
                        image
                            .attr("data-src")
                            .filter(|s| s.to_lowercase().contains("product"))
                    });
                if let Some(source) = source {
                    if sources.insert(source.to_string()) && image.visible {
                        visible += 1;
                    }
                }
            }
        }

        let mut thumbnails = 0;
        for selector in selectors::THUMBNAIL {
            thumbnails += self.find(selector).await?.len();
        }

        if sources.is_empty() {
            let issue = self.issue(
                "Shopper views the product page",
                "Look for product images",
                "No product image was found",
                "[Media] No product image was found. Possible causes:
- image URLs do not follow the product media pattern
- lazy loading never triggered",
                self.js.tail(JS_ERROR_TAIL),
            );
            return Ok(Outcome::failed("No product images found").with_issue(issue));
        }
        Ok(Outcome::passed(format!(
            "Product images present (total: {}, visible: {}, thumbnails: {})",
            sources.len(),
            visible,
            thumbnails
        )))
    }

    async fn description(&mut self) -> E2eResult<Outcome> {
        for selector in selectors::DESCRIPTION {
            if let Some(element) = self.find(selector).await?.into_iter().next() {
                let length = element.text.trim().chars().count();
                if length > 20 {
                    return Ok(Outcome::passed(format!(
                        "Product description present ({} characters)",
                        length
                    )));
                }
            }
        }
        Ok(Outcome::passed(
            "No detailed description found (it may be elsewhere on the page)",
        ))
    }

    async fn variants(&mut self) -> E2eResult<Outcome> {
        let mut groups: Vec<(String, Vec<Element>)> = Vec::new();
        let mut seen = HashSet::new();
        for selector in selectors::VARIANT_RADIO {
            for radio in self.find(selector).await? {
                let (Some(name), Some(_)) = (radio.attr("name"), radio.attr("value")) else {
                    continue;
                };
                let key = radio.attr("id").unwrap_or_default().to_string();
                if !key.is_empty() && !seen.insert(key) {
                    continue;
                }
                let name = name.to_string();
                match groups.iter_mut().find(|(group, _)| *group == name) {
                    Some((_, radios)) => radios.push(radio),
                    None => groups.push((name, vec![radio])),
                }
            }
        }

        let mut notes = Vec::new();
        let mut broken = Vec::new();
        for (name, radios) in &groups {
            if radios.len() < 2 {
                continue;
            }
            let kind = variant_kind(radios[0].attr("value").unwrap_or_default());
            let Some(target) = radios.iter().find(|r| !r.checked) else {
                notes.push(format!("{}: {} options (all selected)", kind, radios.len()));
                continue;
            };
            let Some(id) = target.attr("id").map(str::to_string) else {
                notes.push(format!("{}: {} options (not clickable)", kind, radios.len()));
                continue;
            };

            let control = self
                .find(&selectors::label_for(&id))
                .await?
                .into_iter()
                .next()
                .unwrap_or_else(|| target.clone());
            match self.session.click(&control).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!("Variant {} in group {} not clickable: {}", id, name, e);
                    notes.push(format!("{}: {} options (interaction failed)", kind, radios.len()));
                    continue;
                }
            }
            self.session.wait(CONTROL_SETTLE_MS).await?;

            if self.radio_checked(&id).await? {
                notes.push(format!("{}: {} options, switched", kind, radios.len()));
            } else {
                broken.push(format!(
                    "{} option '{}' did not become selected",
                    kind,
                    target.attr("value").unwrap_or(&id)
                ));
            }
        }

        let mut checkboxes = Vec::new();
        for selector in selectors::ACCESSORY_CHECKBOX {
            checkboxes.extend(self.find(selector).await?.into_iter().filter(|c| c.visible));
            if !checkboxes.is_empty() {
                break;
            }
        }
        if let Some(first) = checkboxes.first() {
            match self.session.click(first).await {
                Ok(()) => {
                    self.session.wait(CONTROL_SETTLE_MS).await?;
                    notes.push(format!("accessories: {}, toggled", checkboxes.len()));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => notes.push(format!("accessories: {} (could not toggle)", checkboxes.len())),
            }
        }

        if !broken.is_empty() {
            let issue = self.issue(
                "Shopper picks a product option",
                "Click an unselected variant option",
                broken.join("; "),
                "[Event handling] The option is present but clicking it does not select it. Possible causes:
- the option's click handler is not bound
- an overlay covers the option
- a script error stopped the variant picker",
                self.js.tail(JS_ERROR_TAIL),
            );
            return Ok(Outcome::failed(format!("Variant selection is broken: {}", broken.join("; ")))
                .with_issue(issue));
        }
        Ok(if notes.is_empty() {
            Outcome::passed("No variant options (standard product)")
        } else {
            Outcome::passed(format!("Variant selection works ({})", notes.join(", ")))
        })
    }

    /// Whether the radio with `id` is checked now; a vanished radio counts as checked
    async fn radio_checked(&mut self, id: &str) -> E2eResult<bool> {
        for selector in selectors::VARIANT_RADIO {
            if let Some(radio) = self
                .find(selector)
                .await?
                .into_iter()
                .find(|r| r.attr("id") == Some(id))
            {
                return Ok(radio.checked);
            }
        }
        Ok(true)
    }

    async fn quantity(&mut self) -> E2eResult<Outcome> {
        let Some(input) = self.quantity_input().await? else {
            return Ok(Outcome::passed(
                "No quantity input (quantity may be controlled elsewhere)",
            ));
        };
        let current = input_value(&input);
        if !input.enabled {
            return Ok(Outcome::passed(format!(
                "Quantity input present but disabled (value: {})",
                current
            )));
        }
        if input.attr("readonly").is_some() {
            return Ok(Outcome::passed(format!(
                "Quantity input is read-only (value: {})",
                current
            )));
        }

        match self.session.fill(&input, "2").await {
            Ok(()) => {
                self.session.wait(INPUT_SETTLE_MS).await?;
                let typed = self.quantity_input().await?.map(|i| input_value(&i));
                if typed.as_deref() == Some("2") {
                    return Ok(Outcome::passed(
                        "Quantity input accepts typed values (set to 2)",
                    ));
                }
                debug!("Typed quantity did not stick: {:?}", typed);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => debug!("Typing into quantity input failed: {}", e),
        }

        if let Some(plus) = find_visible(self.session.as_mut(), selectors::QUANTITY_PLUS).await? {
            let before = self
                .quantity_input()
                .await?
                .and_then(|i| input_value(&i).trim().parse::<u32>().ok());
            let mark = self.js.len();
            match self.session.click(&plus).await {
                Ok(()) => {
                    self.session.wait(INPUT_SETTLE_MS).await?;
                    let after = self.quantity_input().await?.map(|i| input_value(&i));
                    let after_num = after.as_deref().and_then(|v| v.trim().parse::<u32>().ok());
                    if let (Some(b), Some(a)) = (before, after_num) {
                        if a > b {
                            return Ok(Outcome::passed(format!(
                                "Quantity plus button works (now {})",
                                a
                            )));
                        }
                    }
                    let js_errors = self.js.since(mark);
                    let root_cause = if js_errors.is_empty() {
                        EVENT_BINDING_HINT.to_string()
                    } else {
                        classify(&js_errors)
                    };
                    let issue = IssueDetails {
                        scenario: "Shopper changes the quantity on the product page".to_string(),
                        operation: "Click the quantity plus (+) button".to_string(),
                        problem: format!(
                            "The quantity stayed at {}",
                            after.unwrap_or_else(|| current.clone())
                        ),
                        root_cause,
                        js_errors,
                    };
                    return Ok(Outcome::failed("Quantity plus button does not change the quantity")
                        .with_issue(issue));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!("Quantity plus button not clickable: {}", e),
            }
        }

        Ok(Outcome::passed(format!(
            "Quantity input present (value: {}) but does not accept typed input; quantity is usually adjustable in the cart",
            current
        )))
    }

    async fn add_to_cart(&mut self) -> E2eResult<Outcome> {
        let (button, selector) = self.add_button().await?;
        let Some(button) = button else {
            let issue = self.issue(
                "Shopper adds the product to the cart",
                "Look for the add-to-cart button",
                format!("No element matches {}", selector),
                "[Page structure] The add-to-cart button is missing. Possible causes:
- the product form did not render
- the catalog selector is out of date",
                self.js.tail(JS_ERROR_TAIL),
            );
            return Ok(Outcome::failed(format!(
                "Add-to-cart button not found (selector: {})",
                selector
            ))
            .with_issue(issue));
        };

        if !button.visible {
            return Ok(Outcome::failed("Add-to-cart button is not visible"));
        }
        let settle = match self.kinds.len() {
            n if n > 5 => CART_SYNC_MS,
            _ => ADD_SETTLE_MS,
        };

        if button.enabled {
            self.session.click(&button).await?;
            self.session.wait(settle).await?;
            return Ok(Outcome::passed("Clicked the add-to-cart button"));
        }

        info!("Add-to-cart button is disabled, trying to select a variant");
        let variant = self.select_first_variant().await?;
        if let Some(variant) = &variant {
            if let (Some(fresh), _) = self.add_button().await? {
                if fresh.is_actionable() {
                    self.session.click(&fresh).await?;
                    self.session.wait(settle).await?;
                    return Ok(Outcome::passed(format!(
                        "Clicked add to cart after selecting variant {}",
                        variant
                    )));
                }
            }
        }

        if self.any_present(selectors::SOLD_OUT).await? {
            return Ok(Outcome::skipped("Product is sold out"));
        }

        let (message, problem) = match variant {
            Some(_) => (
                "Add-to-cart button is disabled and stays disabled after selecting a variant",
                "The button is disabled and selecting a variant did not enable it",
            ),
            None => (
                "Add-to-cart button is disabled and no variant could be selected",
                "The button is disabled and no selectable variant was found",
            ),
        };
        let issue = self.issue(
            "Shopper adds the product to the cart",
            "Click the add-to-cart button",
            problem,
            "[Add to cart blocked] The button is disabled but the product is not sold out. Possible causes:
- a required variant option is not recognised
- a script error in the product form
- the button state updates late",
            self.js.tail(JS_ERROR_TAIL),
        );
        Ok(Outcome::failed(message).with_issue(issue))
    }

    async fn cart_verification(&mut self) -> E2eResult<Outcome> {
        for selector in selectors::CART_BADGE {
            if let Some(badge) = self.find(selector).await?.into_iter().next() {
                let count = badge.text.trim();
                if !count.is_empty() && count != "0" {
                    return Ok(Outcome::passed(format!("Cart updated, count: {}", count)));
                }
            }
        }

        info!("Cart badge unchanged, confirming on the cart page");
        let cart_url = self.cart_url();
        if let Err(e) = self.session.navigate(&cart_url).await {
            if e.is_fatal() {
                return Err(e);
            }
            return Ok(Outcome::failed("Could not open the cart page to confirm its contents")
                .with_error(e.to_string()));
        }
        self.session.wait(CART_SETTLE_MS).await?;

        let items = self.cart_item_count().await?;
        if items > 0 {
            return Ok(Outcome::passed(format!(
                "Confirmed on the cart page: {} item(s) in the cart",
                items
            )));
        }

        if self.any_present(selectors::CART_EMPTY).await? {
            let issue = self.issue(
                "Shopper checks the cart after adding the product",
                "Look for items on the cart page",
                "The cart page shows an empty cart",
                "[Add to cart broken] Clicking add to cart did not put the product in the cart. Possible causes:
- the add-to-cart request failed
- a required variant was not selected
- the product is out of stock or unpublished",
                self.js.tail(JS_ERROR_TAIL),
            );
            return Ok(Outcome::failed("Cart is empty: the product was not added").with_issue(issue));
        }
        Ok(Outcome::failed(
            "Could not confirm whether the product was added to the cart",
        ))
    }

    async fn recommendations(&mut self) -> E2eResult<Outcome> {
        for selector in selectors::RECOMMENDATIONS {
            let Some(section) = self.find(selector).await?.into_iter().next() else {
                continue;
            };
            let mut count = 0;
            for item in selectors::RECOMMENDATION_ITEM {
                count += self.find_within(&section, item).await?.len();
            }
            if count > 0 {
                return Ok(Outcome::passed(format!(
                    "Recommendations displayed ({} products)",
                    count
                )));
            }
        }
        Ok(Outcome::passed(
            "No recommendations detected (they may be further down the page or absent)",
        ))
    }

    async fn checkout(&mut self) -> E2eResult<Outcome> {
        let check_plus = self.kinds.contains(&StepKind::Quantity);
        let mark = self.js.len();
        let cart_url = self.cart_url();

        self.session.navigate(&cart_url).await?;
        self.session
            .wait(if check_plus { PAGE_SETTLE_MS } else { CART_SETTLE_MS })
            .await?;
        let current = self.session.current_url().await?;
        if !current.contains("/cart") {
            return Ok(Outcome::failed(format!(
                "Could not open the cart page, landed on {}",
                current
            )));
        }

        if check_plus {
            if let Some(issue) = self.check_quantity_increment(&cart_url).await? {
                return Ok(Outcome::failed("Cart quantity increment is broken").with_issue(issue));
            }
        }

        match find_visible(self.session.as_mut(), selectors::CHECKOUT).await? {
            Some(button) if button.enabled => {
                let mut message = "Cart page OK, checkout button is visible and enabled".to_string();
                if self.js.len() > mark {
                    message.push_str(" (script errors on the cart page did not block checkout)");
                }
                return Ok(Outcome::passed(message));
            }
            Some(_) => return Ok(self.disabled_checkout()),
            None => {}
        }

        if self.any_present(selectors::CART_EMPTY).await? {
            let issue = self.issue(
                "Shopper goes from the product page to checkout",
                "Open the cart page to check out",
                "The cart is empty so checkout cannot start",
                "[Purchase flow broken] The product never reached the cart, so checkout cannot continue. Possible causes:
- the add-to-cart step did not actually add the product
- cart state was lost after a redirect
- a required variant was not selected",
                self.js.tail(JS_ERROR_TAIL),
            );
            return Ok(Outcome::failed("Checkout unavailable: the cart is empty").with_issue(issue));
        }

        if self.any_present(selectors::DISABLED_CHECKOUT).await? {
            return Ok(self.disabled_checkout());
        }

        let issue = self.issue(
            "Shopper checks out from the cart page",
            "Look for the checkout button",
            "The cart has items but there is no checkout button",
            "[Page structure] The cart page offers no way to start checkout. Possible causes:
- the cart page markup changed
- the checkout selector needs updating
- the page did not finish rendering",
            self.js.tail(JS_ERROR_TAIL),
        );
        Ok(Outcome::failed("Cart has items but no checkout button was found").with_issue(issue))
    }

    fn disabled_checkout(&self) -> Outcome {
        match self.options.disabled_checkout {
            DisabledCheckoutPolicy::Skip => {
                Outcome::skipped("Checkout button is disabled (treated as a store checkout rule)")
            }
            DisabledCheckoutPolicy::Fail => {
                let issue = self.issue(
                    "Shopper checks out from the cart page",
                    "Click the checkout button",
                    "The checkout button is present but disabled",
                    "[Checkout blocked] The checkout button is disabled. Possible causes:
- the cart does not meet a minimum order value
- stock changed for an item in the cart
- a script error left the button disabled",
                    self.js.tail(JS_ERROR_TAIL),
                );
                Outcome::failed("Checkout button is present but disabled").with_issue(issue)
            }
        }
    }

    /// Click the first cart row's plus button and check that the quantity
    /// goes up. A present button that changes nothing is a defect.
    async fn check_quantity_increment(&mut self, cart_url: &str) -> E2eResult<Option<IssueDetails>> {
        let rows = self.find(selectors::CART_ROW).await?;
        let mut plus = None;
        for row in &rows {
            let controls = self.find_within(row, selectors::ROW_CONTROL).await?;
            if controls.is_empty() {
                continue;
            }
            plus = controls.into_iter().find(|c| c.visible && looks_like_plus(c));
            break;
        }
        let Some(plus) = plus else {
            debug!("No quantity plus button in the cart");
            return Ok(None);
        };

        let before = self.cart_quantity().await?;
        let mark = self.js.len();
        if let Err(e) = self.session.click(&plus).await {
            if e.is_fatal() {
                return Err(e);
            }
            debug!("Cart plus button not clickable: {}", e);
            return Ok(None);
        }
        self.session.wait(PROBE_SETTLE_MS).await?;
        let after = self.cart_quantity().await?;

        if let (Some(b), Some(a)) = (before, after) {
            if a > b {
                info!("Cart quantity increased {} -> {}", b, a);
                return Ok(None);
            }
        }

        let js_errors = self.js.since(mark);
        let operation = match before {
            Some(b) => format!(
                "Click the quantity plus (+) button, expecting the quantity to go from {} to {}",
                b,
                b + 1
            ),
            None => "Click the quantity plus (+) button".to_string(),
        };
        let unchanged = after.map(|a| format!(" (still {})", a)).unwrap_or_default();
        let (problem, root_cause) = if js_errors.is_empty() {
            (
                format!(
                    "The quantity did not change{}; the button is present but does nothing",
                    unchanged
                ),
                EVENT_BINDING_HINT.to_string(),
            )
        } else {
            (
                format!("The quantity did not change{} and script errors were raised", unchanged),
                classify(&js_errors),
            )
        };
        warn!("Cart quantity defect: {}", problem);

        Ok(Some(IssueDetails {
            scenario: format!("Shopper adjusts the item quantity on the cart page ({})", cart_url),
            operation,
            problem,
            root_cause,
            js_errors,
        }))
    }
}

fn input_value(input: &Element) -> String {
    input
        .value
        .clone()
        .or_else(|| input.attr("value").map(str::to_string))
        .unwrap_or_default()
}

fn looks_like_plus(control: &Element) -> bool {
    if control.text.contains('+') {
        return true;
    }
    ["name", "class", "aria-label", "data-action"]
        .iter()
        .filter_map(|attr| control.attr(attr))
        .map(str::to_lowercase)
        .any(|v| v.contains("plus") || v.contains("increase"))
}

fn variant_kind(value: &str) -> &'static str {
    const COLOURS: &[&str] = &["green", "gray", "grey", "black", "white", "red", "blue", "yellow"];
    const MODELS: &[&str] = &["2024", "2025", "t1", "t2", "model", "version"];
    let lower = value.to_lowercase();
    if COLOURS.iter().any(|c| lower.contains(c)) {
        "Color"
    } else if MODELS.iter().any(|m| lower.contains(m)) {
        "Model"
    } else {
        "Variant"
    }
}

fn excerpt(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
