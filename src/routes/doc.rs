use utoipa::{
    Modify, OpenApi,
    openapi::{
        self, OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{LoginRequest, LoginResponse, RegisterRequest},
        cart::{AddCartItemRequest, UpdateCartItemRequest},
        orders::{OrderList, OrderWithItems, PlaceOrderRequest, UpdateOrderStatusRequest},
        products::ProductList,
    },
    models::{Cart, CartItem, Order, OrderItem, OrderStatus, PaymentStatus, Product, User},
    response::{ApiResponse, Meta},
    routes::{admin, auth, cart, health, orders, params, products},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::login,
        auth::register,
        products::list_products,
        products::get_product,
        cart::get_cart,
        cart::add_item,
        cart::update_item,
        cart::remove_item,
        cart::clear_cart,
        orders::place_order,
        orders::list_orders,
        orders::get_order,
        orders::cancel_order,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::cancel_order_admin
    ),
    components(
        schemas(
            User,
            Product,
            Cart,
            CartItem,
            Order,
            OrderItem,
            OrderStatus,
            PaymentStatus,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            AddCartItemRequest,
            UpdateCartItemRequest,
            PlaceOrderRequest,
            UpdateOrderStatusRequest,
            OrderList,
            OrderWithItems,
            ProductList,
            params::Pagination,
            params::OrderListQuery,
            params::AdminOrderQuery,
            params::SortOrder,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<Cart>,
            ApiResponse<Order>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Products", description = "Catalog read endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Admin", description = "Operator endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
