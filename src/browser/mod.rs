mod page;
mod session;

pub use page::CdpCatalogPage;
pub use session::{resolve_http_base, select_target, CdpSession, PageInfo};
