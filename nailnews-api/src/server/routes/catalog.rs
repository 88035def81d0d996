use crate::server::{Result, ServerError, ServerRouter, json::Json, query::Query};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use nailnews_common::{
    directory::{LocationGroups, group_by_location},
    gallery::{Gallery, split_gallery},
    model::{listing::Category, post::Post, tag::Tag},
};
use nailnews_db::client::DbClient;
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(get_tags)
        .typed_get(get_directory)
        .typed_get(get_gallery)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/tags", rejection(ServerError))]
struct TagsPath();

async fn get_tags(TagsPath(): TagsPath, State(db): State<Arc<DbClient>>) -> Result<Json<Vec<Tag>>> {
    Ok(Json(db.fetch_tags().await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/directory", rejection(ServerError))]
struct DirectoryPath();

#[derive(Copy, Clone, Debug, Default, Deserialize)]
struct DirectoryQuery {
    category: Option<Category>,
}

/// Business listings grouped `state -> city`. Without a category every
/// directory category is included.
async fn get_directory(
    DirectoryPath(): DirectoryPath,
    Query(query): Query<DirectoryQuery>,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<LocationGroups<Post>>> {
    let categories: Vec<Category> = match query.category {
        Some(category) => vec![category],
        None => Category::ALL
            .into_iter()
            .filter(|category| category.is_directory())
            .collect(),
    };

    let posts = db.fetch_posts_by_category(&categories).await?;
    Ok(Json(group_by_location(posts)))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/gallery", rejection(ServerError))]
struct GalleryPath();

async fn get_gallery(
    GalleryPath(): GalleryPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Gallery>> {
    let posts = db.fetch_posts_by_category(&[Category::PhotoVideo]).await?;
    Ok(Json(split_gallery(posts)))
}
