pub mod app;
pub mod chembl;
pub mod cmap;
pub mod counts;
pub mod deg;
pub mod domain;
pub mod enrich;
pub mod entrez;
pub mod error;
pub mod extract;
pub mod gct;
pub mod labels;
pub mod output;
pub mod report;
pub mod signature;
pub mod workspace;
