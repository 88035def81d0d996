use crate::server::ServerRouter;

mod admin;
mod catalog;
mod comments;
mod favorites;
mod functions;
mod media;
mod payments;
mod posts;
mod pricing;
mod sessions;
mod site;
mod users;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .merge(users::routes())
        .merge(sessions::routes())
        .merge(posts::routes())
        .merge(favorites::routes())
        .merge(comments::routes())
        .merge(catalog::routes())
        .merge(pricing::routes())
        .merge(payments::routes())
        .merge(media::routes())
        .merge(site::routes())
        .merge(admin::routes())
        .merge(functions::routes())
}
