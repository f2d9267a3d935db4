pub mod ajax;
pub mod ws;

pub(crate) use ajax::ajax_post_handler;
pub(crate) use ws::chsk_get_handler;
