// chemistry module
pub mod chemistry {
    pub mod constants;
    pub mod elements;
    pub mod sum_formula;
    pub mod neutral_loss;
    pub mod adduct;
}

// data module
pub mod data {
    pub mod spectrum;
    pub mod smiles;
}

// algorithm module
pub mod algorithm {
    pub mod fragmentation;
    pub mod matching;
}

// denoise module
pub mod denoise {
    pub mod config;
    pub mod engine;
    pub mod batch;
    pub mod report;
}

pub mod error;
