/// Listing page URLs `1..=count` for a region/category search.
pub fn page_urls(base: &str, region: &str, category: &str, radius: u32, count: usize) -> Vec<String> {
    let base = base.trim_end_matches('/');
    (1..=count)
        .map(|page| {
            format!(
                "{}/{}/{}?cd=1&p={}&radius={}&searchRadius={}",
                base, region, category, page, radius, radius
            )
        })
        .collect()
}
