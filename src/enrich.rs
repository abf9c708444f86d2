use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::chembl::{ChemblClient, MoleculeRecord};
use crate::domain::CandidateDrug;
use crate::error::RepurposeError;

/// One screening hit with its ChEMBL identity and structural neighbourhood
/// attached.
#[derive(Debug, Clone, Serialize)]
pub struct DrugProfile {
    pub candidate: CandidateDrug,
    pub molecule: MoleculeRecord,
    pub similars: Vec<MoleculeRecord>,
}

/// Enrichment result plus the names that fell out along the way, so the
/// final report can say what was silently excluded and why.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichmentOutcome {
    pub profiles: Vec<DrugProfile>,
    pub unmatched: Vec<String>,
    pub duplicates: Vec<String>,
}

/// Resolves candidates against ChEMBL in rank order, then fans out one
/// similarity query per resolved molecule.
///
/// Distinct BRD compounds can resolve to the same ChEMBL molecule; only the
/// best-ranked one is kept, so the report never lists a drug twice.
pub fn enrich_candidates<C: ChemblClient>(
    client: &C,
    candidates: &[CandidateDrug],
) -> Result<EnrichmentOutcome, RepurposeError> {
    let mut outcome = EnrichmentOutcome::default();
    let mut seen: HashSet<String> = HashSet::new();

    for candidate in candidates {
        let Some(molecule) = client.search_molecule(&candidate.name)? else {
            warn!(name = %candidate.name, "no ChEMBL match, dropping candidate");
            outcome.unmatched.push(candidate.name.clone());
            continue;
        };
        if !seen.insert(molecule.chembl_id.clone()) {
            info!(
                name = %candidate.name,
                chembl_id = %molecule.chembl_id,
                "duplicate ChEMBL molecule, keeping the better-ranked hit"
            );
            outcome.duplicates.push(candidate.name.clone());
            continue;
        }
        outcome.profiles.push(DrugProfile {
            candidate: candidate.clone(),
            molecule,
            similars: Vec::new(),
        });
    }

    for profile in &mut outcome.profiles {
        let Some(smiles) = profile.molecule.smiles.as_deref() else {
            warn!(
                chembl_id = %profile.molecule.chembl_id,
                "no canonical SMILES, skipping similarity search"
            );
            continue;
        };
        match client.similar_molecules(smiles) {
            Ok(similars) => profile.similars = similars,
            Err(err) => {
                // One broken similarity query should not sink nine good
                // profiles.
                warn!(
                    chembl_id = %profile.molecule.chembl_id,
                    error = %err,
                    "similarity search failed, reporting without analogues"
                );
            }
        }
    }

    info!(
        profiles = outcome.profiles.len(),
        unmatched = outcome.unmatched.len(),
        duplicates = outcome.duplicates.len(),
        "candidate enrichment finished"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeChembl {
        by_name: HashMap<String, MoleculeRecord>,
        similars: HashMap<String, Vec<MoleculeRecord>>,
        similarity_fails: bool,
    }

    impl ChemblClient for FakeChembl {
        fn search_molecule(&self, name: &str) -> Result<Option<MoleculeRecord>, RepurposeError> {
            Ok(self.by_name.get(name).cloned())
        }

        fn similar_molecules(&self, smiles: &str) -> Result<Vec<MoleculeRecord>, RepurposeError> {
            if self.similarity_fails {
                return Err(RepurposeError::ChemblHttp("boom".to_string()));
            }
            Ok(self.similars.get(smiles).cloned().unwrap_or_default())
        }
    }

    fn molecule(id: &str, smiles: Option<&str>) -> MoleculeRecord {
        MoleculeRecord {
            chembl_id: id.to_string(),
            score: None,
            similarity: None,
            atc_names: Vec::new(),
            pref_name: Some(id.to_lowercase()),
            max_phase: Some(4.0),
            therapeutic: true,
            smiles: smiles.map(str::to_string),
            inchi_key: None,
        }
    }

    fn candidate(name: &str, score: f64) -> CandidateDrug {
        CandidateDrug {
            broad_id: format!("BRD-{name}"),
            name: name.to_string(),
            tag_score: score,
        }
    }

    #[test]
    fn duplicates_keep_the_first_ranked_candidate() {
        let shared = molecule("CHEMBL99", Some("CCO"));
        let client = FakeChembl {
            by_name: HashMap::from([
                ("vorinostat".to_string(), shared.clone()),
                ("vorinostat-salt".to_string(), shared),
                ("tretinoin".to_string(), molecule("CHEMBL38", None)),
            ]),
            similars: HashMap::new(),
            similarity_fails: false,
        };
        let candidates = [
            candidate("vorinostat", -98.0),
            candidate("vorinostat-salt", -90.0),
            candidate("ghost", -80.0),
            candidate("tretinoin", -70.0),
        ];
        let outcome = enrich_candidates(&client, &candidates).unwrap();
        let kept: Vec<&str> = outcome
            .profiles
            .iter()
            .map(|p| p.candidate.name.as_str())
            .collect();
        assert_eq!(kept, ["vorinostat", "tretinoin"]);
        assert_eq!(outcome.duplicates, ["vorinostat-salt"]);
        assert_eq!(outcome.unmatched, ["ghost"]);
    }

    #[test]
    fn similarity_attaches_to_molecules_with_smiles() {
        let client = FakeChembl {
            by_name: HashMap::from([
                ("a".to_string(), molecule("CHEMBL1", Some("CCO"))),
                ("b".to_string(), molecule("CHEMBL2", None)),
            ]),
            similars: HashMap::from([(
                "CCO".to_string(),
                vec![molecule("CHEMBL777", Some("CCN"))],
            )]),
            similarity_fails: false,
        };
        let outcome =
            enrich_candidates(&client, &[candidate("a", -5.0), candidate("b", -4.0)]).unwrap();
        assert_eq!(outcome.profiles[0].similars.len(), 1);
        assert_eq!(outcome.profiles[0].similars[0].chembl_id, "CHEMBL777");
        assert!(outcome.profiles[1].similars.is_empty());
    }

    #[test]
    fn similarity_failure_degrades_to_empty_list() {
        let client = FakeChembl {
            by_name: HashMap::from([("a".to_string(), molecule("CHEMBL1", Some("CCO")))]),
            similars: HashMap::new(),
            similarity_fails: true,
        };
        let outcome = enrich_candidates(&client, &[candidate("a", -5.0)]).unwrap();
        assert_eq!(outcome.profiles.len(), 1);
        assert!(outcome.profiles[0].similars.is_empty());
    }
}
