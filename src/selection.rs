use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{DiscoveryOutcome, Identifier, TaxonId};
use crate::error::KiraError;

pub type Selection = BTreeMap<String, Vec<Identifier>>;

pub fn resolve(
    selected: &BTreeSet<TaxonId>,
    outcome: &DiscoveryOutcome,
) -> Result<Selection, KiraError> {
    if let Some(missing) = selected.iter().find(|taxon_id| !outcome.is_hit(**taxon_id)) {
        return Err(KiraError::SelectionNotFound(format!("txid{missing}")));
    }

    let mut grouped = Selection::new();
    for taxon_id in selected {
        let Some(species) = outcome.species.get(taxon_id) else {
            continue;
        };
        let display_name = outcome
            .index
            .name(*taxon_id)
            .unwrap_or_else(|| species.display_name.clone());
        grouped
            .entry(display_name)
            .or_default()
            .extend(species.identifiers().iter().cloned());
    }
    Ok(grouped)
}

/// Checks identifiers echoed back by a client against the discovery that
/// produced them and returns the discovered records, regrouped by the
/// canonical display names. Names supplied by the client are not trusted.
pub fn resolve_submitted(
    submitted: &BTreeMap<String, Vec<Identifier>>,
    outcome: &DiscoveryOutcome,
) -> Result<Selection, KiraError> {
    let mut wanted: BTreeMap<TaxonId, BTreeSet<&Identifier>> = BTreeMap::new();
    for identifier in submitted.values().flatten() {
        let Some(species) = outcome.species.get(&identifier.taxon_id) else {
            return Err(KiraError::SelectionNotFound(format!(
                "txid{}",
                identifier.taxon_id
            )));
        };
        if !species.identifiers().contains(identifier) {
            return Err(KiraError::SelectionNotFound(identifier.to_string()));
        }
        wanted
            .entry(identifier.taxon_id)
            .or_default()
            .insert(identifier);
    }

    let taxa = wanted.keys().copied().collect::<BTreeSet<_>>();
    let mut selection = resolve(&taxa, outcome)?;
    for identifiers in selection.values_mut() {
        identifiers.retain(|identifier| {
            wanted
                .get(&identifier.taxon_id)
                .is_some_and(|chosen| chosen.contains(identifier))
        });
    }
    Ok(selection)
}

pub fn taxa_of(selection: &Selection) -> BTreeSet<TaxonId> {
    selection
        .values()
        .flatten()
        .map(|identifier| identifier.taxon_id)
        .collect()
}
