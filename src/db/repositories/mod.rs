mod ratings;
mod sessions;
mod sleep;
