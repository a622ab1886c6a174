//! The fixed catalog of analysis blocks.
//!
//! Seven blocks, each backed by its own remote analysis agent. Dependencies
//! are declared here only; the phase layout is derived by [`StageGraph`].

use crate::errors::GraphError;
use crate::pipeline::{StageDefinition, StageGraph};

/// Identifiers of every block, in declaration order.
pub const BLOCK_IDS: [&str; 7] = ["BLOC1", "BLOC2", "BLOC3", "BLOC4", "BLOC5", "BLOC6", "BLOC7"];

/// Legacy block names, already normalized, and the block they map to.
const LEGACY_NAMES: &[(&str, &str)] = &[
    ("PESTEL", "BLOC1"),
    ("PESTEL+", "BLOC1"),
    ("RISQUESCLIMAT", "BLOC2"),
    ("MARCHE", "BLOC3"),
    ("MARCHECONCURRENCE", "BLOC3"),
    ("CHAINEVALEUR", "BLOC4"),
    ("ODD", "BLOC5"),
    ("MODELESDURABLES", "BLOC5"),
    ("REGLEMENTAIRE", "BLOC6"),
    ("CADREREGLEMENTAIRE", "BLOC6"),
    ("SYNTHESE", "BLOC7"),
    ("SYNTHESESTRATEGIQUE", "BLOC7"),
];

/// Organisation profiles and the blocks they run. Matched in order.
const PROFILE_BLOCKS: &[(&str, &[&str])] = &[
    ("entrepreneur", &["BLOC1", "BLOC3", "BLOC5", "BLOC7"]),
    ("pme", &BLOCK_IDS),
    ("banque", &["BLOC1", "BLOC2", "BLOC3", "BLOC6", "BLOC7"]),
    ("collectivite", &["BLOC1", "BLOC2", "BLOC5", "BLOC6", "BLOC7"]),
    ("ong", &["BLOC1", "BLOC2", "BLOC5", "BLOC7"]),
    ("ministere", &["BLOC1", "BLOC2", "BLOC3", "BLOC5", "BLOC6", "BLOC7"]),
    ("entreprise_privee", &BLOCK_IDS),
    ("entreprise_publique", &BLOCK_IDS),
];

/// Returns the seven block definitions.
#[must_use]
pub fn analysis_blocks() -> Vec<StageDefinition> {
    vec![
        StageDefinition::new("BLOC1", "PESTEL+")
            .with_full_name("Analyse PESTEL+ Contextuelle")
            .with_description(
                "Diagnostic of the external environment: political, economic, social, \
                 technological, environmental and legal, extended with climate and biodiversity",
            )
            .with_indicators([
                "indice_politique",
                "indice_economique",
                "indice_social",
                "indice_technologique",
                "indice_environnement",
                "indice_legal",
                "indice_climat",
                "indice_biodiversite",
                "indice_pestel_global",
                "indice_durable_global",
            ]),
        StageDefinition::new("BLOC2", "Risques Climat")
            .with_full_name("Risques Climatiques & Transition ESG")
            .with_description(
                "Physical climate risks, transition risks, sector ESG risks and sustainable \
                 opportunities following the TCFD framework",
            )
            .with_indicators([
                "indice_risques_climatiques",
                "indice_risques_esg",
                "indice_risques_transition",
                "indice_opportunites_transition",
                "indice_global_bloc2",
            ])
            .with_dependencies(["BLOC1"]),
        StageDefinition::new("BLOC3", "Marché & Concurrence")
            .with_full_name("Analyse du Marché et de la Concurrence")
            .with_description(
                "Market analysis, competitive structure (five forces plus complementors), \
                 actor mapping and sustainable differentiation opportunities",
            )
            .with_indicators([
                "indice_attractivite",
                "indice_concurrence",
                "indice_risques_marche",
                "indice_opportunites_durables",
                "indice_global_bloc3",
            ])
            .with_dependencies(["BLOC1"]),
        StageDefinition::new("BLOC4", "Chaîne de Valeur")
            .with_full_name("Analyse de la Chaîne de Valeur Durable")
            .with_description(
                "Sector value chain mapping, vulnerabilities and opportunities per link, \
                 circularity and ESG traceability",
            )
            .with_indicators([
                "indice_vulnerabilites",
                "indice_opportunites",
                "indice_circularite",
                "indice_esg_tracabilite",
                "indice_global_bloc4",
            ])
            .with_dependencies(["BLOC1"]),
        StageDefinition::new("BLOC5", "Modèles Durables & ODD")
            .with_full_name("Modèles Durables et Alignement ODD")
            .with_description(
                "Sustainability materiality, alignment with the 17 SDGs, impact potential \
                 and sustainable finance opportunities",
            )
            .with_indicators([
                "indice_odd",
                "indice_esg",
                "indice_climat_mrv",
                "indice_finance_durable",
                "indice_imm",
                "indice_global_bloc5",
            ])
            .with_dependencies(["BLOC1", "BLOC2"]),
        StageDefinition::new("BLOC6", "Cadre Réglementaire")
            .with_full_name("Cadre Réglementaire & Conformité")
            .with_description(
                "Regulatory mapping (taxonomy, MRV, SBTi, CSRD/ESRS, net zero), compliance \
                 gaps and alignment roadmap",
            )
            .with_indicators([
                "indice_taxonomie",
                "indice_mrv",
                "indice_sbti",
                "indice_csrd",
                "indice_netzero",
                "indice_global_bloc6",
            ])
            .with_dependencies(["BLOC1", "BLOC2", "BLOC5"]),
        StageDefinition::new("BLOC7", "Synthèse Stratégique")
            .with_full_name("Synthèse Stratégique Intégrée")
            .with_description(
                "Consolidation of blocks 1 to 6, extended SWOT, transition roadmap, \
                 financing options and strategic partnerships",
            )
            .with_indicators(["IMD", "IRI", "IOD", "IPT", "IAO", "IPF"])
            .with_dependencies(["BLOC1", "BLOC2", "BLOC3", "BLOC4", "BLOC5", "BLOC6"]),
    ]
}

/// Builds the validated graph over every block.
///
/// # Errors
///
/// Returns a [`GraphError`] only if the catalog itself is inconsistent.
pub fn analysis_graph() -> Result<StageGraph, GraphError> {
    StageGraph::new(analysis_blocks())
}

/// Resolves a block id or legacy block name to its canonical id.
///
/// Case, spaces and underscores are ignored: `bloc_1`, `Bloc 1` and `PESTEL`
/// all resolve to `BLOC1`.
#[must_use]
pub fn resolve_block_id(name: &str) -> Option<&'static str> {
    let normalized: String = name
        .chars()
        .filter(|c| !matches!(c, ' ' | '_'))
        .flat_map(char::to_uppercase)
        .collect();

    BLOCK_IDS
        .iter()
        .copied()
        .find(|id| *id == normalized)
        .or_else(|| {
            LEGACY_NAMES
                .iter()
                .find(|(legacy, _)| *legacy == normalized)
                .map(|(_, id)| *id)
        })
}

/// Returns the blocks to run for an organisation profile.
///
/// Unknown profiles run every block.
#[must_use]
pub fn blocks_for_profile(profile: &str) -> Vec<&'static str> {
    let key: String = profile
        .to_lowercase()
        .chars()
        .filter(|c| *c != '\'')
        .map(|c| if matches!(c, ' ' | '-') { '_' } else { c })
        .collect();

    if key.is_empty() {
        return BLOCK_IDS.to_vec();
    }

    PROFILE_BLOCKS
        .iter()
        .find(|(name, _)| key.contains(name) || name.contains(key.as_str()))
        .map_or_else(|| BLOCK_IDS.to_vec(), |(_, blocks)| blocks.to_vec())
}
