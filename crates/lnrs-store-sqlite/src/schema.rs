pub const LATEST_SCHEMA_VERSION: i64 = 1;

pub(crate) const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

pub(crate) const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS measure (
  measure_id INTEGER PRIMARY KEY,
  measure TEXT NOT NULL,
  concise_measure TEXT,
  core_supplementary TEXT,
  mapped_unmapped TEXT,
  link_to_further_guidance TEXT
);

CREATE TABLE IF NOT EXISTS area (
  area_id INTEGER PRIMARY KEY,
  area_name TEXT NOT NULL,
  area_description TEXT,
  area_link TEXT
);

CREATE TABLE IF NOT EXISTS priority (
  priority_id INTEGER PRIMARY KEY,
  biodiversity_priority TEXT NOT NULL,
  simplified_biodiversity_priority TEXT,
  theme TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS species (
  species_id INTEGER PRIMARY KEY,
  common_name TEXT NOT NULL,
  linnaean_name TEXT,
  assemblage TEXT,
  taxa TEXT,
  species_link TEXT
);

CREATE TABLE IF NOT EXISTS grant_table (
  grant_id TEXT PRIMARY KEY,
  grant_name TEXT NOT NULL,
  grant_scheme TEXT,
  url TEXT,
  grant_summary TEXT
);

CREATE TABLE IF NOT EXISTS habitat (
  habitat_id INTEGER PRIMARY KEY,
  habitat TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS measure_type (
  measure_type_id INTEGER PRIMARY KEY,
  measure_type TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS stakeholder (
  stakeholder_id INTEGER PRIMARY KEY,
  stakeholder TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS benefits (
  benefit_id INTEGER PRIMARY KEY,
  benefit TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS measure_has_type (
  measure_id INTEGER NOT NULL,
  measure_type_id INTEGER NOT NULL,
  PRIMARY KEY (measure_id, measure_type_id),
  FOREIGN KEY (measure_id) REFERENCES measure(measure_id),
  FOREIGN KEY (measure_type_id) REFERENCES measure_type(measure_type_id)
);

CREATE TABLE IF NOT EXISTS measure_has_stakeholder (
  measure_id INTEGER NOT NULL,
  stakeholder_id INTEGER NOT NULL,
  PRIMARY KEY (measure_id, stakeholder_id),
  FOREIGN KEY (measure_id) REFERENCES measure(measure_id),
  FOREIGN KEY (stakeholder_id) REFERENCES stakeholder(stakeholder_id)
);

CREATE TABLE IF NOT EXISTS measure_has_benefits (
  measure_id INTEGER NOT NULL,
  benefit_id INTEGER NOT NULL,
  PRIMARY KEY (measure_id, benefit_id),
  FOREIGN KEY (measure_id) REFERENCES measure(measure_id),
  FOREIGN KEY (benefit_id) REFERENCES benefits(benefit_id)
);

CREATE TABLE IF NOT EXISTS measure_has_species (
  measure_id INTEGER NOT NULL,
  species_id INTEGER NOT NULL,
  PRIMARY KEY (measure_id, species_id),
  FOREIGN KEY (measure_id) REFERENCES measure(measure_id),
  FOREIGN KEY (species_id) REFERENCES species(species_id)
);

CREATE TABLE IF NOT EXISTS measure_area_priority (
  measure_id INTEGER NOT NULL,
  area_id INTEGER NOT NULL,
  priority_id INTEGER NOT NULL,
  PRIMARY KEY (measure_id, area_id, priority_id),
  FOREIGN KEY (measure_id) REFERENCES measure(measure_id),
  FOREIGN KEY (area_id) REFERENCES area(area_id),
  FOREIGN KEY (priority_id) REFERENCES priority(priority_id)
);

CREATE TABLE IF NOT EXISTS measure_area_priority_grant (
  measure_id INTEGER NOT NULL,
  area_id INTEGER NOT NULL,
  priority_id INTEGER NOT NULL,
  grant_id TEXT NOT NULL,
  PRIMARY KEY (measure_id, area_id, priority_id, grant_id),
  FOREIGN KEY (measure_id, area_id, priority_id)
    REFERENCES measure_area_priority(measure_id, area_id, priority_id),
  FOREIGN KEY (grant_id) REFERENCES grant_table(grant_id)
);

CREATE TABLE IF NOT EXISTS species_area_priority (
  species_id INTEGER NOT NULL,
  area_id INTEGER NOT NULL,
  priority_id INTEGER NOT NULL,
  PRIMARY KEY (species_id, area_id, priority_id),
  FOREIGN KEY (species_id) REFERENCES species(species_id),
  FOREIGN KEY (area_id) REFERENCES area(area_id),
  FOREIGN KEY (priority_id) REFERENCES priority(priority_id)
);

CREATE TABLE IF NOT EXISTS area_funding_schemes (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  area_id INTEGER NOT NULL,
  local_funding_schemes TEXT NOT NULL,
  FOREIGN KEY (area_id) REFERENCES area(area_id)
);

CREATE TABLE IF NOT EXISTS habitat_creation_area (
  habitat_id INTEGER NOT NULL,
  area_id INTEGER NOT NULL,
  PRIMARY KEY (habitat_id, area_id),
  FOREIGN KEY (habitat_id) REFERENCES habitat(habitat_id),
  FOREIGN KEY (area_id) REFERENCES area(area_id)
);

CREATE TABLE IF NOT EXISTS habitat_management_area (
  habitat_id INTEGER NOT NULL,
  area_id INTEGER NOT NULL,
  PRIMARY KEY (habitat_id, area_id),
  FOREIGN KEY (habitat_id) REFERENCES habitat(habitat_id),
  FOREIGN KEY (area_id) REFERENCES area(area_id)
);

CREATE INDEX IF NOT EXISTS idx_map_area ON measure_area_priority(area_id);
CREATE INDEX IF NOT EXISTS idx_map_priority ON measure_area_priority(priority_id);
CREATE INDEX IF NOT EXISTS idx_mapg_grant ON measure_area_priority_grant(grant_id);
CREATE INDEX IF NOT EXISTS idx_mapg_area ON measure_area_priority_grant(area_id);
CREATE INDEX IF NOT EXISTS idx_mapg_priority ON measure_area_priority_grant(priority_id);
CREATE INDEX IF NOT EXISTS idx_sap_area ON species_area_priority(area_id);
CREATE INDEX IF NOT EXISTS idx_sap_priority ON species_area_priority(priority_id);
CREATE INDEX IF NOT EXISTS idx_funding_area ON area_funding_schemes(area_id);
CREATE INDEX IF NOT EXISTS idx_habitat_creation_area ON habitat_creation_area(area_id);
CREATE INDEX IF NOT EXISTS idx_habitat_management_area ON habitat_management_area(area_id);
CREATE INDEX IF NOT EXISTS idx_measure_has_species_species ON measure_has_species(species_id);
";
