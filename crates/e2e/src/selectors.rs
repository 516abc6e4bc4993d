//! CSS selectors for common storefront themes
//!
//! Lists are tried in order; the first one that yields a usable element wins.

pub const TITLE: &[&str] = &[
    "h1.product-meta__title",
    ".product-meta__title",
    "h1.product__title",
    ".product-title",
    "[data-product-title]",
    ".product-single__title",
    "h1.product-name",
    "h1.heading.h1",
];

/// Title words that indicate an error page rather than a product
pub const ERROR_TITLE_WORDS: &[&str] = &[
    "500",
    "502",
    "503",
    "504",
    "error",
    "not found",
    "unavailable",
];

pub const PRICE: &[&str] = &[
    ".price--highlight",
    ".sale-price",
    ".sales-price",
    ".price-box .price",
    ".product-form__price-info .price",
    "meta[property='product:price:amount']",
    ".money",
    "[data-price]",
];

pub const ADD_TO_CART: &[&str] = &[
    "button[name='add']",
    ".product-form__add-button",
    "button:has-text('Add to cart')",
];

pub const UNSELECTED_VARIANT: &[&str] = &[
    "input[type='radio'].product-form__single-selector:not(:checked)",
    "input[type='radio'].block-swatch__radio:not(:checked)",
    ".product-form__input input[type='radio']:not(:checked)",
];

pub const VARIANT_RADIO: &[&str] = &[
    "input[type='radio'].product-form__single-selector",
    "input[type='radio'].block-swatch__radio",
];

pub const ACCESSORY_CHECKBOX: &[&str] = &["input[type='checkbox'].isfree", "input[type='checkbox']"];

pub const SOLD_OUT: &[&str] = &[
    "button:has-text('Sold Out')",
    "button:has-text('Out of Stock')",
    ".sold-out",
    "[data-sold-out='true']",
];

pub const CART_BADGE: &[&str] = &[
    ".cart-count",
    ".cart-quantity",
    "[data-cart-count]",
    ".header__cart-count",
];

pub const CART_ITEM: &[&str] = &["tr.cart-item", ".cart-item", "[data-cart-item]"];

pub const CART_EMPTY: &[&str] = &[".cart-empty", ".empty-cart", "text='Your cart is empty'"];

pub const CHECKOUT: &[&str] = &[
    "button[name='checkout']",
    "[name='checkout']",
    "button:has-text('Check out')",
    "button:has-text('Checkout')",
    "a[href*='/checkout']",
    "form[action*='checkout'] button",
    "#checkout",
];

pub const DISABLED_CHECKOUT: &[&str] = &[
    "button[name='checkout'][disabled]",
    "button:has-text('Checkout')[disabled]",
];

pub const STRUCTURE_HEADER: &[&str] = &["header", ".header"];
pub const STRUCTURE_MAIN: &[&str] = &["main", ".main-content"];

pub const PRODUCT_IMAGE: &[&str] = &[
    "img[src*='product']",
    "img[data-src*='product']",
    ".product__media-item img",
    ".product-main-image img",
    ".product-image img",
];

pub const THUMBNAIL: &[&str] = &[
    ".product__media-thumbs img",
    ".product-thumbnails img",
    ".thumbnail img",
];

pub const DESCRIPTION: &[&str] = &[
    ".product__description",
    ".product-description",
    "[data-product-description]",
    ".description",
];

pub const QUANTITY_INPUT: &[&str] = &[
    "input[name='quantity']",
    "input[type='number'][name*='quantity']",
    ".quantity-selector input",
    ".qty input",
];

pub const QUANTITY_PLUS: &[&str] = &[
    "button.quantity-plus",
    "button[aria-label*='Increase']",
    "button.quantity__button:has-text('+')",
];

pub const RECOMMENDATIONS: &[&str] = &[
    ".product-recommendations",
    ".related-products",
    ".recommended-products",
    "[data-recommendations]",
];

pub const RECOMMENDATION_ITEM: &[&str] = &[".product-item", ".product-card"];

pub const CART_ROW: &str = "tr";
pub const ROW_CONTROL: &str = "button, a";
pub const CART_QUANTITY: &str = "input[type='number']";

pub fn label_for(id: &str) -> String {
    format!("label[for='{}']", id)
}

/// Whether a title belongs to an error page
pub fn is_error_title(title: &str) -> bool {
    let lower = title.to_lowercase();
    ERROR_TITLE_WORDS.iter().any(|w| lower.contains(w))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_titles() {
        assert!(is_error_title("502 Bad Gateway"));
        assert!(is_error_title("Page Not Found"));
        assert!(!is_error_title("Fiido C11 Pro City E-Bike"));
    }
}
