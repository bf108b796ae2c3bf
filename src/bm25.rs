//! Okapi BM25 scoring over tokenized chunks.
//!
//! The scorer is built once from the full token corpus and queried per
//! search. The idf uses the non-negative `ln((N - df + 0.5) / (df + 0.5) + 1)`
//! form, so a score is strictly positive exactly when the chunk shares at
//! least one token with the query.

use std::collections::HashMap;

pub const BM25_K1: f64 = 1.5;
pub const BM25_B: f64 = 0.75;

#[derive(Debug)]
pub struct Bm25 {
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lens: Vec<usize>,
    avgdl: f64,
    idf: HashMap<String, f64>,
    k1: f64,
    b: f64,
}

impl Bm25 {
    /// Build a scorer from per-chunk token vectors.
    pub fn new(corpus: &[Vec<String>]) -> Self {
        let n = corpus.len();
        let mut term_freqs: Vec<HashMap<String, u32>> = Vec::with_capacity(n);
        let mut doc_lens: Vec<usize> = Vec::with_capacity(n);
        let mut doc_freqs: HashMap<String, u32> = HashMap::new();

        for tokens in corpus {
            let mut freqs: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            doc_lens.push(tokens.len());
            term_freqs.push(freqs);
        }

        let total: usize = doc_lens.iter().sum();
        let avgdl = if n > 0 { total as f64 / n as f64 } else { 0.0 };

        let idf = doc_freqs
            .into_iter()
            .map(|(term, df)| {
                let df = df as f64;
                let value = ((n as f64 - df + 0.5) / (df + 0.5) + 1.0).ln();
                (term, value)
            })
            .collect();

        Self {
            term_freqs,
            doc_lens,
            avgdl,
            idf,
            k1: BM25_K1,
            b: BM25_B,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    /// BM25 score of chunk `idx` against the query tokens.
    pub fn score(&self, query: &[String], idx: usize) -> f64 {
        let freqs = &self.term_freqs[idx];
        let dl = self.doc_lens[idx] as f64;
        let norm = if self.avgdl > 0.0 {
            1.0 - self.b + self.b * dl / self.avgdl
        } else {
            1.0
        };

        let mut score = 0.0;
        for term in query {
            let Some(&tf) = freqs.get(term) else { continue };
            let Some(&idf) = self.idf.get(term) else { continue };
            let tf = tf as f64;
            score += idf * (tf * (self.k1 + 1.0)) / (tf + self.k1 * norm);
        }
        score
    }

    /// Scores for every chunk in corpus order.
    pub fn get_scores(&self, query: &[String]) -> Vec<f64> {
        (0..self.len()).map(|idx| self.score(query, idx)).collect()
    }
}
