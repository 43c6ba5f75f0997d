
mod listing;
mod provider;
